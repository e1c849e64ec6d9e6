//! Generated portal files.
//!
//! Produces everything uploaded to a portal space:
//! - `app.py`: the Gradio entrypoint, one layout per template
//! - `README.md`: space front matter plus a short description
//! - `requirements.txt`, `style.css`, `portal_config.json`
//! - the file manifest (path, size, sha256) logged before upload

pub mod app;
pub mod bundle;
pub mod readme;
pub mod theme;

pub use app::{GRADIO_VERSION, generate_app_entrypoint, generate_requirements};
pub use bundle::{
    ManifestEntry, RenderedTemplate, SpaceBundle, SpaceFile, build_space_bundle, portal_document,
};
pub use readme::{ReadmeContext, generate_readme};
pub use theme::{KNOWN_SECTIONS, default_theme, render_css};

/// Render the entrypoint and README for the context's template.
pub fn render_template(ctx: &ReadmeContext<'_>) -> RenderedTemplate {
    let title = format!("{} · CV Portal", ctx.display_name);
    RenderedTemplate {
        app_entrypoint: generate_app_entrypoint(ctx.template, &title),
        readme: generate_readme(ctx),
    }
}
