use super::*;

#[test]
fn collect_joins_fragments_in_order() {
    let fragments = vec![Ok("The ".to_string()), Ok("answer".to_string())];
    let mut seen = Vec::new();

    let answer =
        collect_fragments(fragments, |f| seen.push(f.to_string())).expect("should collect");

    assert_eq!(answer, "The answer");
    assert_eq!(seen, vec!["The ", "answer"]);
}

#[test]
fn collect_surfaces_partial_answer_on_failure() {
    let fragments = vec![
        Ok("half an ".to_string()),
        Ok("answer".to_string()),
        Err(RagError::GenerationBackend {
            message: "connection reset".to_string(),
            partial: None,
        }),
    ];

    let error = collect_fragments(fragments, |_| {}).expect_err("should fail");

    assert_eq!(error.partial_answer(), Some("half an answer"));
    assert!(error.to_string().contains("connection reset"));
}

#[test]
fn collect_without_partial_output() {
    let fragments = vec![Err(RagError::Io(std::io::Error::other("boom")))];

    let error = collect_fragments(fragments, |_| {}).expect_err("should fail");

    assert!(matches!(error, RagError::GenerationBackend { .. }));
    assert_eq!(error.partial_answer(), None);
}

#[test]
fn options_builder() {
    let options = GenerationOptions::default()
        .with_temperature(0.3)
        .with_max_tokens(256);
    assert_eq!(options.temperature, Some(0.3));
    assert_eq!(options.max_tokens, Some(256));
}
