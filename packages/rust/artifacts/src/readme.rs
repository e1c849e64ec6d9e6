//! Space `README.md` with front matter.

use cvportal_shared::{PortalTemplate, PortalUrls};

use crate::app::GRADIO_VERSION;

/// Inputs for the README.
#[derive(Debug, Clone)]
pub struct ReadmeContext<'a> {
    pub display_name: &'a str,
    pub headline: Option<&'a str>,
    pub template: PortalTemplate,
    pub sdk: &'a str,
    pub urls: &'a PortalUrls,
    pub rag_enabled: bool,
}

pub fn generate_readme(ctx: &ReadmeContext<'_>) -> String {
    let (color_from, color_to) = match ctx.template {
        PortalTemplate::Professional => ("blue", "indigo"),
        PortalTemplate::Minimal => ("gray", "gray"),
        PortalTemplate::Creative => ("purple", "yellow"),
        PortalTemplate::Technical => ("green", "gray"),
    };

    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("title: {} CV Portal\n", yaml_safe(ctx.display_name)));
    out.push_str("emoji: 📄\n");
    out.push_str(&format!("colorFrom: {color_from}\n"));
    out.push_str(&format!("colorTo: {color_to}\n"));
    out.push_str(&format!("sdk: {}\n", ctx.sdk));
    if ctx.sdk == "gradio" {
        out.push_str(&format!("sdk_version: {GRADIO_VERSION}\n"));
    }
    out.push_str("app_file: app.py\n");
    out.push_str("pinned: false\n");
    out.push_str("---\n\n");

    out.push_str(&format!("# {}\n\n", ctx.display_name));
    if let Some(headline) = ctx.headline {
        out.push_str(&format!("{headline}\n\n"));
    }
    out.push_str(&format!(
        "Interactive CV portal built with the `{}` template.\n\n",
        ctx.template.as_str()
    ));
    out.push_str(&format!("- Portal: {}\n", ctx.urls.portal));
    if ctx.rag_enabled {
        out.push_str(&format!("- Chat: {}\n", ctx.urls.chat));
        out.push_str(
            "\nAsk the assistant about experience, skills and projects. Answers are drawn \
             only from this CV.\n",
        );
    }
    out
}

/// Front matter values are unquoted YAML scalars; drop characters that
/// would change their meaning.
fn yaml_safe(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, ':' | '#' | '"' | '\'' | '\n' | '\r'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> PortalUrls {
        PortalUrls {
            portal: "https://john-doe-abc12345-cv-portal.hf.space".into(),
            chat: "https://john-doe-abc12345-cv-portal.hf.space/chat".into(),
            api: "https://john-doe-abc12345-cv-portal.hf.space/api".into(),
            deployed: false,
        }
    }

    #[test]
    fn front_matter_names_sdk_and_app_file() {
        let urls = urls();
        let readme = generate_readme(&ReadmeContext {
            display_name: "John Doe",
            headline: Some("Software Engineer"),
            template: PortalTemplate::Professional,
            sdk: "gradio",
            urls: &urls,
            rag_enabled: true,
        });
        assert!(readme.starts_with("---\ntitle: John Doe CV Portal\n"));
        assert!(readme.contains("sdk: gradio\nsdk_version: 4.44.0\napp_file: app.py\n"));
        assert!(readme.contains("- Chat: https://john-doe-abc12345-cv-portal.hf.space/chat"));
    }

    #[test]
    fn chat_line_omitted_without_rag() {
        let urls = urls();
        let readme = generate_readme(&ReadmeContext {
            display_name: "Dr. O'Neil: PhD",
            headline: None,
            template: PortalTemplate::Minimal,
            sdk: "gradio",
            urls: &urls,
            rag_enabled: false,
        });
        assert!(readme.contains("title: Dr. ONeil PhD CV Portal\n"));
        assert!(!readme.contains("- Chat:"));
    }
}
