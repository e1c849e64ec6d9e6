//! Template default themes and stylesheet rendering.

use cvportal_shared::{DesignTheme, PortalTemplate};

/// Sections a portal page can show, in the professional default order.
pub const KNOWN_SECTIONS: [&str; 8] = [
    "summary",
    "experience",
    "skills",
    "education",
    "projects",
    "certifications",
    "languages",
    "custom",
];

const MINIMAL_ORDER: &[&str] = &["summary", "experience", "education", "skills"];

const CREATIVE_ORDER: &[&str] = &[
    "summary",
    "projects",
    "experience",
    "skills",
    "certifications",
    "education",
    "languages",
    "custom",
];

const TECHNICAL_ORDER: &[&str] = &[
    "summary",
    "skills",
    "projects",
    "experience",
    "certifications",
    "education",
    "languages",
    "custom",
];

/// The theme a template ships with before any customization.
pub fn default_theme(template: PortalTemplate) -> DesignTheme {
    let (primary, secondary, background, font, order) = match template {
        PortalTemplate::Professional => {
            ("#1e3a5f", "#4a90d9", "#ffffff", "Inter", KNOWN_SECTIONS.as_slice())
        }
        PortalTemplate::Minimal => ("#111111", "#6b7280", "#ffffff", "Helvetica Neue", MINIMAL_ORDER),
        PortalTemplate::Creative => ("#7c3aed", "#f59e0b", "#fdf4ff", "Poppins", CREATIVE_ORDER),
        PortalTemplate::Technical => {
            ("#0f172a", "#22c55e", "#0b1120", "JetBrains Mono", TECHNICAL_ORDER)
        }
    };

    DesignTheme {
        primary_color: primary.to_string(),
        secondary_color: secondary.to_string(),
        background_color: background.to_string(),
        font_family: font.to_string(),
        section_order: order.iter().map(|s| s.to_string()).collect(),
        custom_css: None,
    }
}

/// `style.css` for the deployed portal.
pub fn render_css(theme: &DesignTheme) -> String {
    let mut css = format!(
        r#":root {{
  --portal-primary: {primary};
  --portal-secondary: {secondary};
  --portal-background: {background};
}}

.gradio-container {{
  background: var(--portal-background);
  font-family: "{font}", system-ui, sans-serif;
}}

.portal-header h1 {{
  color: var(--portal-primary);
}}

.portal-section h2 {{
  color: var(--portal-primary);
  border-bottom: 2px solid var(--portal-secondary);
}}

a {{
  color: var(--portal-secondary);
}}
"#,
        primary = theme.primary_color,
        secondary = theme.secondary_color,
        background = theme.background_color,
        font = theme.font_family,
    );

    if let Some(custom) = theme.custom_css.as_deref().filter(|c| !c.trim().is_empty()) {
        css.push_str("\n/* custom */\n");
        css.push_str(custom.trim());
        css.push('\n');
    }
    css
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_template_has_a_usable_default() {
        for template in [
            PortalTemplate::Professional,
            PortalTemplate::Minimal,
            PortalTemplate::Creative,
            PortalTemplate::Technical,
        ] {
            let theme = default_theme(template);
            assert!(theme.primary_color.starts_with('#'));
            assert_eq!(theme.section_order[0], "summary");
            assert!(
                theme
                    .section_order
                    .iter()
                    .all(|s| KNOWN_SECTIONS.contains(&s.as_str()))
            );
        }
    }

    #[test]
    fn css_carries_theme_and_custom_rules() {
        let mut theme = default_theme(PortalTemplate::Technical);
        theme.custom_css = Some(".badge { display: none; }".into());
        let css = render_css(&theme);
        assert!(css.contains("--portal-primary: #0f172a;"));
        assert!(css.contains("\"JetBrains Mono\""));
        assert!(css.ends_with(".badge { display: none; }\n"));
    }
}
