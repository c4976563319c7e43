use grepr_core::{truncate_chars, CategorySet, PostRecord};
use std::fmt::Write;

pub fn system_prompt(categories: &CategorySet) -> String {
    let mut prompt = String::from(
        "You analyse personal finance posts from Reddit. \
         Classify the post into exactly one category from this list:\n",
    );
    for category in categories.iter() {
        let _ = writeln!(prompt, "- {}: {}", category.name, category.description);
    }
    let _ = write!(
        prompt,
        "\nUse \"{}\" only when no other category fits.\n\
         Answer with a single JSON object and nothing else:\n\
         {{\"category\": \"<one category name>\", \
         \"summary\": \"<two sentences at most>\", \
         \"key_advice\": [\"<actionable advice>\", ...], \
         \"tags\": [\"<keyword>\", ...], \
         \"consensus\": \"fort\" | \"moyen\" | \"faible\" | \"divisé\" | null}}\n\
         Write the summary and advice in the language of the post. \
         Give at most 3 pieces of advice and 5 tags. \
         The consensus describes how much the top comment agrees with the post; \
         use null when there is no comment.",
        categories.fallback()
    );
    prompt
}

pub fn user_prompt(post: &PostRecord, max_chars: usize) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Subreddit: r/{}", post.subreddit);
    let _ = writeln!(prompt, "Score: {}", post.score);
    let _ = writeln!(prompt, "Title: {}", post.title);

    let body = post.selftext.trim();
    if !body.is_empty() {
        let _ = writeln!(prompt, "\nBody:\n{}", truncate_chars(body, max_chars));
    }
    if let Some(comment) = &post.top_comment {
        let text = comment.body.trim();
        if !text.is_empty() {
            let _ = writeln!(
                prompt,
                "\nTop comment (score {}):\n{}",
                comment.score,
                truncate_chars(text, max_chars / 2)
            );
        }
    }
    prompt
}
