//! Profile → tagged text chunks.
//!
//! One chunk per qualifying profile section, emitted in a fixed section
//! order and then by original list index, so identical input always yields
//! an identical chunk list. Chunks whose `{section}:{index}` key was already
//! embedded from the same content are skipped; edited entries come back.

use std::collections::{BTreeMap, HashMap, HashSet};

use sha2::{Digest, Sha256};

use cvportal_shared::{ChunkMetadata, ContentType, CvData, TextChunk};

/// Splits a [`CvData`] into [`TextChunk`]s.
#[derive(Debug, Clone, Default)]
pub struct ContentChunker {
    /// Chunk key -> content hash of the stored embedding.
    covered: HashMap<String, String>,
}

impl ContentChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip chunks already embedded with the same `(key, content hash)`.
    pub fn with_covered(mut self, covered: impl IntoIterator<Item = (String, String)>) -> Self {
        self.covered.extend(covered);
        self
    }

    /// Chunk key for a section entry.
    pub fn chunk_key(section: &str, index: usize) -> String {
        format!("{section}:{index}")
    }

    pub fn chunk(&self, cv: &CvData) -> Vec<TextChunk> {
        let mut out = Vec::new();

        if let Some(text) = personal_text(cv) {
            let mut keywords = Vec::new();
            keywords.extend(cv.personal_info.title.iter().cloned());
            keywords.extend(cv.personal_info.location.iter().cloned());
            self.push(&mut out, ChunkDraft::new("personal", 0, ContentType::Personal, 10, text)
                .keywords(keywords));
        }

        for (i, exp) in cv.experience.iter().enumerate() {
            let Some(text) = experience_text(exp) else { continue };
            let mut keywords = exp.technologies.clone();
            keywords.push(exp.company.clone());
            let mut draft = ChunkDraft::new("experience", i, ContentType::Experience, 9, text)
                .subsection(&exp.company)
                .keywords(keywords)
                .extra("company", &exp.company)
                .extra("title", &exp.title);
            if let Some(start) = &exp.start_date {
                draft = draft.extra("startDate", start);
            }
            if let Some(end) = &exp.end_date {
                draft = draft.extra("endDate", end);
            }
            self.push(&mut out, draft);
        }

        for (i, edu) in cv.education.iter().enumerate() {
            let Some(text) = education_text(edu) else { continue };
            let mut keywords = vec![edu.institution.clone()];
            keywords.extend(edu.field.iter().cloned());
            self.push(
                &mut out,
                ChunkDraft::new("education", i, ContentType::Education, 6, text)
                    .subsection(&edu.institution)
                    .keywords(keywords)
                    .extra("institution", &edu.institution),
            );
        }

        if let Some(text) = skills_text(cv) {
            let keywords = cv.skills.iter().map(|s| s.name.clone()).collect();
            self.push(
                &mut out,
                ChunkDraft::new("skills", 0, ContentType::Skills, 8, text).keywords(keywords),
            );
        }

        for (i, project) in cv.projects.iter().enumerate() {
            if project.name.trim().is_empty() {
                continue;
            }
            let mut text = format!("Project: {}", project.name.trim());
            if let Some(desc) = non_empty(project.description.as_deref()) {
                text.push('\n');
                text.push_str(desc);
            }
            if !project.technologies.is_empty() {
                text.push_str(&format!("\nTechnologies: {}", project.technologies.join(", ")));
            }
            if let Some(url) = non_empty(project.url.as_deref()) {
                text.push_str(&format!("\nURL: {url}"));
            }
            self.push(
                &mut out,
                ChunkDraft::new("projects", i, ContentType::Project, 7, text)
                    .subsection(&project.name)
                    .keywords(project.technologies.clone()),
            );
        }

        for (i, cert) in cv.certifications.iter().enumerate() {
            if cert.name.trim().is_empty() {
                continue;
            }
            let mut text = cert.name.trim().to_string();
            if let Some(issuer) = non_empty(cert.issuer.as_deref()) {
                text.push_str(&format!(", issued by {issuer}"));
            }
            if let Some(date) = non_empty(cert.date.as_deref()) {
                text.push_str(&format!(" ({date})"));
            }
            if let Some(id) = non_empty(cert.credential_id.as_deref()) {
                text.push_str(&format!("\nCredential ID: {id}"));
            }
            let mut draft = ChunkDraft::new("certifications", i, ContentType::Certification, 7, text)
                .keywords(cert.issuer.iter().cloned().collect());
            if let Some(issuer) = &cert.issuer {
                draft = draft.extra("issuer", issuer);
            }
            self.push(&mut out, draft);
        }

        if let Some(text) = languages_text(cv) {
            let keywords = cv.languages.iter().map(|l| l.language.clone()).collect();
            self.push(
                &mut out,
                ChunkDraft::new("languages", 0, ContentType::Languages, 5, text)
                    .keywords(keywords),
            );
        }

        for (i, section) in cv.custom_sections.iter().enumerate() {
            let mut body: Vec<String> = Vec::new();
            body.extend(non_empty(section.content.as_deref()).map(String::from));
            body.extend(
                section
                    .items
                    .iter()
                    .filter(|item| !item.trim().is_empty())
                    .map(|item| format!("- {}", item.trim())),
            );
            if body.is_empty() {
                continue;
            }
            let text = format!("{}\n{}", section.title.trim(), body.join("\n"));
            self.push(
                &mut out,
                ChunkDraft::new("custom", i, ContentType::Custom, 4, text)
                    .subsection(&section.title),
            );
        }

        out
    }

    fn push(&self, out: &mut Vec<TextChunk>, draft: ChunkDraft) {
        let key = Self::chunk_key(draft.section, draft.index);
        let chunk = draft.finish(key);
        match self.covered.get(&chunk.metadata.chunk_key) {
            Some(hash) if *hash == chunk.metadata.content_hash => {
                tracing::trace!(key = %chunk.metadata.chunk_key, "chunk already covered");
            }
            Some(_) => {
                tracing::debug!(key = %chunk.metadata.chunk_key, "chunk content changed");
                out.push(chunk);
            }
            None => out.push(chunk),
        }
    }
}

/// Builder for one chunk's metadata.
struct ChunkDraft {
    section: &'static str,
    index: usize,
    content_type: ContentType,
    importance: u8,
    content: String,
    subsection: Option<String>,
    keywords: Vec<String>,
    extra: BTreeMap<String, String>,
}

impl ChunkDraft {
    fn new(
        section: &'static str,
        index: usize,
        content_type: ContentType,
        importance: u8,
        content: String,
    ) -> Self {
        Self {
            section,
            index,
            content_type,
            importance,
            content,
            subsection: None,
            keywords: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    fn subsection(mut self, name: &str) -> Self {
        self.subsection = non_empty(Some(name)).map(String::from);
        self
    }

    fn keywords(mut self, raw: Vec<String>) -> Self {
        self.keywords = normalize_keywords(raw);
        self
    }

    fn extra(mut self, key: &str, value: &str) -> Self {
        if let Some(value) = non_empty(Some(value)) {
            self.extra.insert(key.to_string(), value.to_string());
        }
        self
    }

    fn finish(self, chunk_key: String) -> TextChunk {
        let content_hash = content_hash(&self.content);
        TextChunk {
            content: self.content,
            metadata: ChunkMetadata {
                section: self.section.to_string(),
                subsection: self.subsection,
                importance: self.importance.clamp(1, 10),
                keywords: self.keywords,
                content_type: self.content_type,
                chunk_key,
                content_hash,
                extra: self.extra,
            },
        }
    }
}

fn personal_text(cv: &CvData) -> Option<String> {
    let name = cv.display_name()?;
    let info = &cv.personal_info;
    let mut lines = vec![format!("Name: {name}")];
    if let Some(title) = non_empty(info.title.as_deref()) {
        lines.push(format!("Title: {title}"));
    }
    if let Some(location) = non_empty(info.location.as_deref()) {
        lines.push(format!("Location: {location}"));
    }
    if let Some(summary) = cv.summary_text() {
        lines.push(format!("Summary: {summary}"));
    }
    Some(lines.join("\n"))
}

fn experience_text(exp: &cvportal_shared::Experience) -> Option<String> {
    if exp.title.trim().is_empty() && exp.company.trim().is_empty() {
        return None;
    }
    let mut text = format!("{} at {}", exp.title.trim(), exp.company.trim());
    match (
        non_empty(exp.start_date.as_deref()),
        non_empty(exp.end_date.as_deref()),
    ) {
        (Some(start), Some(end)) => text.push_str(&format!(" ({start} - {end})")),
        (Some(start), None) => text.push_str(&format!(" ({start} - Present)")),
        _ => {}
    }
    if let Some(location) = non_empty(exp.location.as_deref()) {
        text.push_str(&format!("\nLocation: {location}"));
    }
    if let Some(desc) = non_empty(exp.description.as_deref()) {
        text.push('\n');
        text.push_str(desc);
    }
    let achievements: Vec<&str> = exp
        .achievements
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect();
    if !achievements.is_empty() {
        text.push_str("\nAchievements:");
        for a in achievements {
            text.push_str(&format!("\n- {a}"));
        }
    }
    if !exp.technologies.is_empty() {
        text.push_str(&format!("\nTechnologies: {}", exp.technologies.join(", ")));
    }
    Some(text)
}

fn education_text(edu: &cvportal_shared::Education) -> Option<String> {
    if edu.degree.trim().is_empty() && edu.institution.trim().is_empty() {
        return None;
    }
    let mut text = edu.degree.trim().to_string();
    if let Some(field) = non_empty(edu.field.as_deref()) {
        text.push_str(&format!(" in {field}"));
    }
    text.push_str(&format!(" from {}", edu.institution.trim()));
    if let Some(end) = non_empty(edu.end_date.as_deref()) {
        match non_empty(edu.start_date.as_deref()) {
            Some(start) => text.push_str(&format!(" ({start} - {end})")),
            None => text.push_str(&format!(" ({end})")),
        }
    }
    if let Some(gpa) = non_empty(edu.gpa.as_deref()) {
        text.push_str(&format!("\nGPA: {gpa}"));
    }
    Some(text)
}

/// Skills grouped by category, categories in first-seen order.
fn skills_text(cv: &CvData) -> Option<String> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for skill in cv.skills.iter().filter(|s| !s.name.trim().is_empty()) {
        let category = skill
            .category
            .as_deref()
            .and_then(|c| non_empty(Some(c)))
            .unwrap_or("Skills")
            .to_string();
        let label = match non_empty(skill.level.as_deref()) {
            Some(level) => format!("{} ({level})", skill.name.trim()),
            None => skill.name.trim().to_string(),
        };
        match groups.iter_mut().find(|(c, _)| *c == category) {
            Some((_, items)) => items.push(label),
            None => groups.push((category, vec![label])),
        }
    }
    if groups.is_empty() {
        return None;
    }
    Some(
        groups
            .into_iter()
            .map(|(category, items)| format!("{category}: {}", items.join(", ")))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

fn languages_text(cv: &CvData) -> Option<String> {
    let items: Vec<String> = cv
        .languages
        .iter()
        .filter(|l| !l.language.trim().is_empty())
        .map(|l| match non_empty(l.proficiency.as_deref()) {
            Some(p) => format!("{} ({p})", l.language.trim()),
            None => l.language.trim().to_string(),
        })
        .collect();
    if items.is_empty() {
        return None;
    }
    Some(format!("Languages: {}", items.join(", ")))
}

/// Lower-case, trim, and de-duplicate keywords in first-seen order.
fn normalize_keywords(raw: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .collect()
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
