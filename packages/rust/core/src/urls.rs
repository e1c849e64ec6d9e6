//! Portal naming: slug, space name and placeholder URLs.

use std::sync::LazyLock;

use regex::Regex;

use cvportal_shared::{PortalGenError, PortalUrls, Result};

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

const MAX_NAME_LEN: usize = 40;
const JOB_SUFFIX_LEN: usize = 8;

/// `{sanitized-name}-{job-suffix}`.
///
/// The name is lower-cased with every run of non-alphanumerics collapsed to
/// a single `-` and capped at 40 characters. The suffix is the first eight
/// alphanumerics of the job id, so two people with the same name never
/// collide.
pub fn portal_slug(display_name: &str, job_id: &str) -> Result<String> {
    let lowered = display_name.to_lowercase();
    let collapsed = NON_ALNUM.replace_all(&lowered, "-");
    let mut name: String = collapsed.trim_matches('-').chars().take(MAX_NAME_LEN).collect();
    while name.ends_with('-') {
        name.pop();
    }

    let suffix: String = job_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(JOB_SUFFIX_LEN)
        .collect::<String>()
        .to_lowercase();

    match (name.is_empty(), suffix.is_empty()) {
        (true, true) => Err(PortalGenError::validation(format!(
            "cannot derive a portal name from '{display_name}' and job '{job_id}'"
        ))),
        (true, false) => Ok(suffix),
        (false, true) => Ok(name),
        (false, false) => Ok(format!("{name}-{suffix}")),
    }
}

pub fn space_name(slug: &str) -> String {
    format!("{slug}-cv-portal")
}

/// URLs used until a deployment reports the real ones.
pub fn placeholder_urls(slug: &str) -> PortalUrls {
    let portal = format!("https://{}.hf.space", space_name(slug));
    PortalUrls {
        chat: format!("{portal}/chat"),
        api: format!("{portal}/api"),
        portal,
        deployed: false,
    }
}

/// URLs after a successful deployment.
pub fn deployed_urls(space_url: &str, api_url: Option<&str>) -> PortalUrls {
    let portal = space_url.trim_end_matches('/').to_string();
    PortalUrls {
        chat: format!("{portal}/chat"),
        api: api_url
            .map(str::to_string)
            .unwrap_or_else(|| format!("{portal}/api")),
        portal,
        deployed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_sanitizes_and_suffixes() {
        assert_eq!(
            portal_slug("John Doe", "3f9a1c7e-55aa-4b1e").unwrap(),
            "john-doe-3f9a1c7e"
        );
        assert_eq!(
            portal_slug("  Zoë  O'Brien-Smith, PhD ", "JOB_42").unwrap(),
            "zo-o-brien-smith-phd-job42"
        );
    }

    #[test]
    fn long_names_are_capped_without_trailing_dash() {
        let slug = portal_slug(&"abcdefghi ".repeat(10), "job1").unwrap();
        let (name, suffix) = slug.rsplit_once('-').unwrap();
        assert!(name.len() <= 40);
        assert!(!name.ends_with('-'));
        assert_eq!(suffix, "job1");
    }

    #[test]
    fn unusable_input_is_rejected() {
        assert_eq!(portal_slug("!!!", "j-1").unwrap(), "j1");
        assert!(portal_slug("!!!", "---").is_err());
    }

    #[test]
    fn placeholders_follow_space_name() {
        let urls = placeholder_urls("john-doe-3f9a1c7e");
        assert_eq!(urls.portal, "https://john-doe-3f9a1c7e-cv-portal.hf.space");
        assert_eq!(urls.chat, "https://john-doe-3f9a1c7e-cv-portal.hf.space/chat");
        assert_eq!(urls.api, "https://john-doe-3f9a1c7e-cv-portal.hf.space/api");
        assert!(!urls.deployed);
    }

    #[test]
    fn deployed_urls_replace_placeholders() {
        let urls = deployed_urls("https://ns-space.hf.space/", None);
        assert_eq!(urls.portal, "https://ns-space.hf.space");
        assert_eq!(urls.api, "https://ns-space.hf.space/api");
        assert!(urls.deployed);
    }
}
