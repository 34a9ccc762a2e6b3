/// Research questions asked when a request supplies none.
pub const DEFAULT_QUESTIONS: &[&str] = &[
    "What is the main objective of the research?",
    "What methodology was used in the study?",
    "What are the key findings or results?",
    "What conclusions did the authors draw?",
    "What are the limitations of the study?",
    "What motivated the researchers to conduct this study?",
    "How does this research relate to existing literature?",
    "What are the practical implications of the findings?",
    "What assumptions underlie the research?",
    "What statistical methods were used to analyze the data?",
    "How robust are the study's findings?",
    "Are there any potential biases in the study design or data collection?",
    "How do the results compare with previous studies on the same topic?",
    "What are the potential future applications of this research?",
    "How could this research be expanded or built upon in future studies?",
    "What new questions have emerged as a result of this study?",
];

/// The caller's questions, or the defaults when none (or only blanks) were given.
pub fn resolve_questions(requested: &[String]) -> Vec<String> {
    let cleaned: Vec<String> = requested
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect();
    if cleaned.is_empty() {
        DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect()
    } else {
        cleaned
    }
}
