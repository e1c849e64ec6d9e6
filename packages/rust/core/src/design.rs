//! Customization payload validation and theme resolution.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use cvportal_artifacts::{KNOWN_SECTIONS, default_theme};
use cvportal_shared::{Customization, DesignTheme, PortalGenError, PortalTemplate, Result};

static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("static regex"));

static FONT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9 \-]{1,64}$").expect("static regex"));

pub const MAX_CUSTOM_CSS_BYTES: usize = 10 * 1024;

/// Merge `custom` over the template's default theme.
///
/// Every problem in the payload is collected into one validation error so a
/// caller sees all of them at once.
pub fn resolve_theme(template: PortalTemplate, custom: &Customization) -> Result<DesignTheme> {
    let mut theme = default_theme(template);
    let mut problems = Vec::new();

    for (field, value, slot) in [
        ("primaryColor", &custom.primary_color, &mut theme.primary_color),
        ("secondaryColor", &custom.secondary_color, &mut theme.secondary_color),
        ("backgroundColor", &custom.background_color, &mut theme.background_color),
    ] {
        if let Some(value) = value {
            let value = value.trim();
            if HEX_COLOR.is_match(value) {
                *slot = value.to_lowercase();
            } else {
                problems.push(format!("{field} '{value}' is not a hex colour"));
            }
        }
    }

    if let Some(font) = &custom.font_family {
        let font = font.trim();
        if FONT_NAME.is_match(font) {
            theme.font_family = font.to_string();
        } else {
            problems.push(format!("fontFamily '{font}' is not a plain font name"));
        }
    }

    if let Some(order) = &custom.section_order {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(order.len());
        for section in order {
            let section = section.trim().to_lowercase();
            if !KNOWN_SECTIONS.contains(&section.as_str()) {
                problems.push(format!("unknown section '{section}'"));
            } else if !seen.insert(section.clone()) {
                problems.push(format!("section '{section}' listed twice"));
            } else {
                resolved.push(section);
            }
        }
        if resolved.is_empty() && problems.is_empty() {
            problems.push("sectionOrder is empty".to_string());
        }
        theme.section_order = resolved;
    }

    if let Some(css) = &custom.custom_css {
        if css.len() > MAX_CUSTOM_CSS_BYTES {
            problems.push(format!(
                "customCss is {} bytes, limit is {MAX_CUSTOM_CSS_BYTES}",
                css.len()
            ));
        } else if css.contains("</style") || css.to_lowercase().contains("@import") {
            problems.push("customCss may not import or close style blocks".to_string());
        } else if !css.trim().is_empty() {
            theme.custom_css = Some(css.clone());
        }
    }

    if problems.is_empty() {
        Ok(theme)
    } else {
        Err(PortalGenError::validation(format!(
            "invalid customization: {}",
            problems.join("; ")
        )))
    }
}
