//! Built-in pipeline templates.
//!
//! | Template | Steps |
//! |----------|-------|
//! | `paper_default` | fetch → summarize, reading_notes, flashcards, figures |

use pipeline::{Edge, EdgeId, OpId, OpRef, OperatorKey, Pipeline, PipelineId, PortKey, Step, StepKey};
use serde_json::json;

/// Names of every built-in template.
pub const TEMPLATE_NAMES: &[&str] = &["paper_default"];

/// Looks up a built-in template by name.
pub fn template(name: &str) -> Option<Pipeline> {
    match name {
        "paper_default" => Some(paper_default()),
        _ => None,
    }
}

fn op(id: &'static str, operator_key: &'static str) -> OpRef {
    OpRef::new(OpId::from_static(id), OperatorKey::from_static(operator_key))
}

fn step(key: &'static str, label: &str, operators: Vec<OpRef>) -> Step {
    Step::new(StepKey::from_static(key), label, operators)
}

fn edge(
    id: &'static str,
    (source_op, source_port): (&'static str, &'static str),
    (target_op, target_port): (&'static str, &'static str),
) -> Edge {
    Edge::new(
        EdgeId::from_static(id),
        OpId::from_static(source_op),
        PortKey::from_static(source_port),
        OpId::from_static(target_op),
        PortKey::from_static(target_port),
    )
}

/// Default paper pipeline.
///
/// ```text
/// fetch          pdf_fetch
/// summarize      summary → save_summary
/// reading_notes  reading_notes → save_reading_notes
/// flashcards     study_quiz → save_flashcards
/// figures        extract_figures → figure_association → apply_figure_associations
/// ```
///
/// `apply_figure_associations` also depends on `save_reading_notes` so the
/// cards it updates exist before it runs.
pub fn paper_default() -> Pipeline {
    let steps = vec![
        step("fetch", "Fetch PDF", vec![op("pdf_fetch", "pdf_fetch")]).at(0.0, 250.0),
        step(
            "summarize",
            "Generate Summary",
            vec![op("summary", "summary"), op("save_summary", "save_summary")],
        )
        .at(300.0, 0.0),
        step(
            "reading_notes",
            "Reading Notes",
            vec![
                op("reading_notes", "reading_notes"),
                op("save_reading_notes", "save_cards")
                    .with_override("card_type", json!("reading_note")),
            ],
        )
        .at(300.0, 180.0),
        step(
            "flashcards",
            "Flashcards",
            vec![
                op("study_quiz", "study_quiz"),
                op("save_flashcards", "save_cards").with_override("card_type", json!("flashcard")),
            ],
        )
        .at(300.0, 360.0),
        step(
            "figures",
            "Figure Extraction & Association",
            vec![
                op("extract_figures", "extract_figures"),
                op("figure_association", "figure_association"),
                op("apply_figure_associations", "apply_figure_associations"),
            ],
        )
        .at(300.0, 540.0),
    ];

    let edges = vec![
        edge("e0", ("__input__", "url"), ("pdf_fetch", "url")),
        edge("e1", ("pdf_fetch", "text"), ("summary", "text")),
        edge("e2", ("pdf_fetch", "text"), ("reading_notes", "text")),
        edge("e3", ("pdf_fetch", "text"), ("study_quiz", "text")),
        edge("e4", ("pdf_fetch", "pdf_bytes"), ("extract_figures", "pdf_bytes")),
        edge("e4b", ("__input__", "url"), ("extract_figures", "url")),
        edge("e5", ("extract_figures", "images"), ("figure_association", "images")),
        edge("e7", ("reading_notes", "notes"), ("figure_association", "notes")),
        edge("e8", ("summary", "summary"), ("save_summary", "summary")),
        edge("e9", ("reading_notes", "notes"), ("save_reading_notes", "items")),
        edge("e10", ("study_quiz", "flashcards"), ("save_flashcards", "items")),
        edge(
            "e11",
            ("figure_association", "associations"),
            ("apply_figure_associations", "associations"),
        ),
        edge(
            "e12",
            ("extract_figures", "saved_paths"),
            ("apply_figure_associations", "saved_paths"),
        ),
        edge(
            "e13",
            ("save_reading_notes", "batch_id"),
            ("apply_figure_associations", "notes_batch"),
        ),
    ];

    Pipeline {
        id: Some(PipelineId::from_static("paper_default")),
        name: "Paper Processing (Default)".to_string(),
        description: "Fetch PDF → summary + reading notes + quiz + figure association".to_string(),
        steps,
        edges,
    }
}
