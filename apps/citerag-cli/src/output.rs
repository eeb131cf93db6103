use citerag_hybrid::{GuardedAnswer, RetrievalResponse};

const PREVIEW_CHARS: usize = 160;

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        format!("{}...", flat.chars().take(PREVIEW_CHARS).collect::<String>())
    }
}

pub fn format_response(response: &RetrievalResponse) -> String {
    let mut out = format!("collection: {} ({})", response.collection, response.decision_method);
    if response.degraded {
        out.push_str(" [sparse only]");
    }
    out.push('\n');
    if response.retrieved_k == 0 {
        out.push_str("No matching chunks in the knowledge base.");
        return out;
    }
    for (hit, cit) in response.hits.iter().zip(&response.citations) {
        out.push_str(&format!("\n[{}] {} score={:.3}\n    {}\n", cit.cit_id, hit.chunk_id, cit.score, preview(&hit.text)));
    }
    out
}

pub fn format_answer(answer: &GuardedAnswer, response: &RetrievalResponse) -> String {
    let mut out = answer.text.clone();
    if !answer.citations.is_empty() {
        out.push_str("\n\nSources:");
        for cit in &answer.citations {
            out.push_str(&format!("\n  {} {} ({})", cit.cit_id, cit.chunk_id, response.collection));
        }
    }
    out
}
