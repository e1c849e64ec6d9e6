//! Gradio application entrypoint (`app.py`) and its requirements.
//!
//! The generated app is data-driven: it reads `portal_config.json`,
//! `style.css` and, when chat is enabled, `vector_store.json` from its own
//! directory. Only the page layout differs between templates, so design
//! customization never requires re-rendering the entrypoint.

use cvportal_shared::PortalTemplate;

/// Pinned Gradio release the entrypoint is written against.
pub const GRADIO_VERSION: &str = "4.44.0";

const APP_PY: &str = r####"import json
import os
from pathlib import Path

import gradio as gr
import numpy as np
import requests

ROOT = Path(__file__).parent
PORTAL = json.loads((ROOT / "portal_config.json").read_text())
PROFILE = PORTAL["profile"]
DESIGN = PORTAL["design"]
RAG = PORTAL["rag"]
TITLE = __TITLE__
CSS = (ROOT / "style.css").read_text() if (ROOT / "style.css").exists() else ""
INSUFFICIENT = "I don't have enough information in this CV to answer that question."

STORE = None
if RAG["enabled"] and (ROOT / "vector_store.json").exists():
    STORE = json.loads((ROOT / "vector_store.json").read_text())
    MATRIX = np.array([e["vector"] for e in STORE["embeddings"]], dtype=np.float32)
    NORMS = np.linalg.norm(MATRIX, axis=1)


def _lines(items):
    return "\n".join(f"- {item}" for item in items if item)


def render_section(name):
    info = PROFILE.get("personalInfo", {})
    if name == "summary":
        text = PROFILE.get("summary") or info.get("summary")
        return f"## About\n{text}" if text else ""
    if name == "experience" and PROFILE.get("experience"):
        parts = ["## Experience"]
        for exp in PROFILE["experience"]:
            end = exp.get("endDate") or "Present"
            parts.append(f"### {exp.get('title', '')} · {exp.get('company', '')}")
            if exp.get("startDate"):
                parts.append(f"*{exp['startDate']} – {end}*")
            if exp.get("description"):
                parts.append(exp["description"])
            parts.append(_lines(exp.get("achievements", [])))
        return "\n\n".join(p for p in parts if p)
    if name == "skills" and PROFILE.get("skills"):
        return "## Skills\n" + ", ".join(s["name"] for s in PROFILE["skills"])
    if name == "education" and PROFILE.get("education"):
        rows = [f"- **{e.get('degree', '')}**, {e.get('institution', '')}" for e in PROFILE["education"]]
        return "## Education\n" + "\n".join(rows)
    if name == "projects" and PROFILE.get("projects"):
        rows = [f"- **{p['name']}**: {p.get('description') or ''}" for p in PROFILE["projects"]]
        return "## Projects\n" + "\n".join(rows)
    if name == "certifications" and PROFILE.get("certifications"):
        rows = [f"- {c['name']} ({c.get('issuer') or ''})" for c in PROFILE["certifications"]]
        return "## Certifications\n" + "\n".join(rows)
    if name == "languages" and PROFILE.get("languages"):
        rows = [f"- {l['language']} {l.get('proficiency') or ''}" for l in PROFILE["languages"]]
        return "## Languages\n" + "\n".join(rows)
    if name == "custom":
        blocks = []
        for c in PROFILE.get("customSections", []):
            blocks.append(f"## {c['title']}\n{c.get('content') or ''}\n{_lines(c.get('items', []))}")
        return "\n\n".join(blocks)
    return ""


def header_markdown():
    info = PROFILE.get("personalInfo", {})
    lines = [f"# {info.get('name', '')}"]
    if info.get("title"):
        lines.append(f"**{info['title']}**")
    if PORTAL["privacy"].get("showContactInfo"):
        contact = [info.get(k) for k in ("email", "location", "website", "linkedin", "github")]
        lines.append(" · ".join(c for c in contact if c))
    return "\n\n".join(lines)


def _embed(text):
    response = requests.post(
        os.environ["EMBEDDING_BASE_URL"].rstrip("/") + "/embeddings",
        headers={"Authorization": f"Bearer {os.environ.get('EMBEDDING_API_KEY', '')}"},
        json={"model": RAG["model"], "input": [text]},
        timeout=30,
    )
    response.raise_for_status()
    return np.array(response.json()["data"][0]["embedding"], dtype=np.float32)


def retrieve(question):
    query = RAG["query"]
    vector = _embed(question)
    denom = NORMS * np.linalg.norm(vector)
    scores = np.divide(MATRIX @ vector, denom, out=np.zeros_like(NORMS), where=denom > 0)
    ranked = sorted(
        range(len(scores)),
        key=lambda i: (-scores[i], -STORE["embeddings"][i]["metadata"]["importance"], i),
    )
    context, tokens = [], 0
    for i in ranked[: query["topK"]]:
        if scores[i] < query["minScore"]:
            break
        content = STORE["embeddings"][i]["content"]
        cost = -(-len(content) // 4)
        if tokens + cost > query["maxContextTokens"]:
            break
        context.append(content)
        tokens += cost
    return "\n\n".join(context)


def answer(question, history):
    if STORE is None:
        return INSUFFICIENT
    try:
        context = retrieve(question)
    except Exception:
        context = ""
    if not context:
        return INSUFFICIENT
    response = requests.post(
        os.environ["CHAT_BASE_URL"].rstrip("/") + "/chat/completions",
        headers={"Authorization": f"Bearer {os.environ.get('CHAT_API_KEY', '')}"},
        json={
            "model": os.environ.get("CHAT_MODEL", "gpt-4o-mini"),
            "messages": [
                {"role": "system", "content": f"{RAG['systemPrompt']}\n\nContext:\n{context}"},
                {"role": "user", "content": question},
            ],
        },
        timeout=60,
    )
    response.raise_for_status()
    return response.json()["choices"][0]["message"]["content"]


def sections():
    return [s for s in (render_section(n) for n in DESIGN["sectionOrder"]) if s]


with gr.Blocks(title=TITLE, css=CSS) as demo:
__LAYOUT__

if __name__ == "__main__":
    demo.launch()
"####;

const PROFESSIONAL_LAYOUT: &str = r####"    gr.Markdown(header_markdown(), elem_classes=["portal-header"])
    with gr.Tabs():
        with gr.Tab("Profile"):
            for block in sections():
                gr.Markdown(block, elem_classes=["portal-section"])
        if STORE is not None:
            with gr.Tab("Ask about me"):
                gr.ChatInterface(answer)"####;

const MINIMAL_LAYOUT: &str = r####"    gr.Markdown(header_markdown(), elem_classes=["portal-header"])
    gr.Markdown("\n\n".join(sections()), elem_classes=["portal-section"])
    if STORE is not None:
        with gr.Accordion("Questions?", open=False):
            gr.ChatInterface(answer)"####;

const CREATIVE_LAYOUT: &str = r####"    with gr.Row():
        with gr.Column(scale=2):
            gr.Markdown(header_markdown(), elem_classes=["portal-header"])
            for block in sections():
                gr.Markdown(block, elem_classes=["portal-section"])
        if STORE is not None:
            with gr.Column(scale=1):
                gr.Markdown("### Chat with my CV")
                gr.ChatInterface(answer)"####;

const TECHNICAL_LAYOUT: &str = r####"    gr.Markdown(header_markdown(), elem_classes=["portal-header"])
    with gr.Row():
        with gr.Column(scale=3):
            for block in sections():
                gr.Markdown(block, elem_classes=["portal-section"])
        with gr.Column(scale=2):
            gr.JSON(value={"skills": [s["name"] for s in PROFILE.get("skills", [])]}, label="stack")
            if STORE is not None:
                gr.ChatInterface(answer)"####;

fn layout(template: PortalTemplate) -> &'static str {
    match template {
        PortalTemplate::Professional => PROFESSIONAL_LAYOUT,
        PortalTemplate::Minimal => MINIMAL_LAYOUT,
        PortalTemplate::Creative => CREATIVE_LAYOUT,
        PortalTemplate::Technical => TECHNICAL_LAYOUT,
    }
}

/// Render `app.py` for a template.
pub fn generate_app_entrypoint(template: PortalTemplate, title: &str) -> String {
    // A JSON string literal is also a valid Python string literal.
    let title_literal =
        serde_json::to_string(title).unwrap_or_else(|_| "\"CV Portal\"".to_string());
    APP_PY
        .replace("__TITLE__", &title_literal)
        .replace("__LAYOUT__", layout(template))
}

/// `requirements.txt` for the generated app.
pub fn generate_requirements() -> String {
    format!("gradio=={GRADIO_VERSION}\nnumpy>=1.26\nrequests>=2.31\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_escaped_and_layout_inserted() {
        let app = generate_app_entrypoint(PortalTemplate::Creative, "Jane \"JJ\" Doe · CV");
        assert!(app.contains(r#"TITLE = "Jane \"JJ\" Doe · CV""#));
        assert!(app.contains("gr.Markdown(\"### Chat with my CV\")"));
        assert!(!app.contains("__LAYOUT__"));
        assert!(!app.contains("__TITLE__"));
    }

    #[test]
    fn templates_render_distinct_layouts() {
        let professional = generate_app_entrypoint(PortalTemplate::Professional, "x");
        let minimal = generate_app_entrypoint(PortalTemplate::Minimal, "x");
        assert!(professional.contains("gr.Tab(\"Ask about me\")"));
        assert!(minimal.contains("gr.Accordion"));
        assert_ne!(professional, minimal);
    }

    #[test]
    fn requirements_pin_gradio() {
        assert!(generate_requirements().starts_with("gradio==4.44.0\n"));
    }
}
