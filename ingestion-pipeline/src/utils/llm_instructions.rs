pub static TOPIC_SYSTEM_MESSAGE: &str =
    "You assign short topic labels to passages of personal notes.";

pub static SUMMARY_SYSTEM_MESSAGE: &str = "You condense passages of personal notes.";

pub static QUESTION_SYSTEM_MESSAGE: &str =
    "You write the question a passage of personal notes answers.";

pub fn topic_prompt(document: &str, context: &str) -> String {
    format!(
        "Name the single topic that best describes the passage below. \
         Reply with the topic name only.\n\n\
         Document: {document}\n\n\
         Passage:\n\"\"\"\n{context}\n\"\"\"\n\n\
         Topic:"
    )
}

pub fn unify_topics_prompt(topics: &[String]) -> String {
    format!(
        "These topics were found in one document. Name one broader parent topic that \
         covers all of them. Reply with the topic name only, not a sentence.\n\n\
         Topics:\n{}\n\n\
         Parent topic:",
        topics.join(", ")
    )
}

pub fn summary_prompt(text: &str) -> String {
    format!(
        "Summarize the main idea of the text below in one or two plain sentences.\n\n\
         Text:\n\"\"\"\n{text}\n\"\"\"\n\n\
         Summary:"
    )
}

pub fn question_prompt(text: &str) -> String {
    format!(
        "Write one short question, at most ten words, that the text below answers. \
         Use everyday words a curious beginner would use.\n\n\
         Text:\n\"\"\"\n{text}\n\"\"\"\n\n\
         Question:"
    )
}

pub fn merge_questions_prompt(first: &str, second: &str) -> String {
    format!(
        "Combine the two questions below into one clear question covering both. \
         Keep it under fifteen words; prefer the simpler wording when a combined \
         question would be convoluted.\n\n\
         Question 1: {first}\n\
         Question 2: {second}\n\n\
         Combined question:"
    )
}
