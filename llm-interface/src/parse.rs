//! Turns the assistant's free-form answer into a `PostAnalysis`.
//!
//! Models wrap JSON in code fences, add a sentence before it, or return a
//! bullet string where a list was asked for. Parsing is lenient about all of
//! that and strict about one thing: there must be a JSON object with a
//! category in it.

use grepr_core::{CategorySet, PostAnalysis};
use serde::Deserialize;

const MAX_TAGS: usize = 5;
const CONSENSUS_LEVELS: [&str; 4] = ["fort", "moyen", "faible", "divisé"];

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    List(Vec<String>),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    category: Option<String>,
    summary: Option<String>,
    #[serde(alias = "advice")]
    key_advice: Option<StringOrList>,
    tags: Option<StringOrList>,
    consensus: Option<String>,
}

/// Parses an assistant message. The error is a human-readable reason.
pub fn parse_analysis(content: &str, categories: &CategorySet) -> Result<PostAnalysis, String> {
    let json = extract_json_object(content).ok_or_else(|| "no JSON object in answer".to_string())?;
    let raw: RawAnalysis =
        serde_json::from_str(json).map_err(|e| format!("malformed JSON object: {}", e))?;

    let category = raw
        .category
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| "answer has no category".to_string())?;

    Ok(PostAnalysis {
        category: categories.resolve(&category),
        summary: raw.summary.unwrap_or_default().trim().to_string(),
        key_advice: raw.key_advice.map(advice_items).unwrap_or_default(),
        tags: raw.tags.map(tag_items).unwrap_or_default(),
        consensus: raw.consensus.as_deref().and_then(normalize_consensus),
    })
}

fn extract_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

fn advice_items(value: StringOrList) -> Vec<String> {
    let items = match value {
        StringOrList::List(items) => items,
        StringOrList::Text(text) => text.lines().map(str::to_string).collect(),
    };
    items
        .iter()
        .map(|item| strip_bullet(item))
        .filter(|item| !item.is_empty())
        .collect()
}

fn tag_items(value: StringOrList) -> Vec<String> {
    let items = match value {
        StringOrList::List(items) => items,
        StringOrList::Text(text) => text.split(',').map(str::to_string).collect(),
    };
    let mut tags: Vec<String> = Vec::new();
    for tag in items {
        let tag = tag.trim().trim_start_matches('#').trim().to_string();
        if !tag.is_empty() && !tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            tags.push(tag);
        }
    }
    tags.truncate(MAX_TAGS);
    tags
}

fn strip_bullet(item: &str) -> String {
    let trimmed = item.trim();
    let without_number = match trimmed.split_once(['.', ')']) {
        Some((prefix, rest))
            if !prefix.is_empty()
                && prefix.chars().all(|c| c.is_ascii_digit())
                && rest.starts_with(char::is_whitespace) =>
        {
            rest
        }
        _ => trimmed,
    };
    without_number
        .trim_start_matches(['-', '*', '•'])
        .trim()
        .to_string()
}

fn normalize_consensus(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let lowered = if lowered == "divise" { "divisé".to_string() } else { lowered };
    CONSENSUS_LEVELS
        .iter()
        .find(|level| **level == lowered)
        .map(|level| level.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> CategorySet {
        CategorySet::default()
    }

    #[test]
    fn test_parses_plain_json() {
        let answer = r#"{"category": "ETF", "summary": "Comparaison CW8 / WPEA.",
            "key_advice": ["Privilégier les frais bas", "Rester investi"],
            "tags": ["CW8", "WPEA"], "consensus": "fort"}"#;
        let analysis = parse_analysis(answer, &categories()).unwrap();
        assert_eq!(analysis.category, "ETF");
        assert_eq!(analysis.summary, "Comparaison CW8 / WPEA.");
        assert_eq!(analysis.key_advice.len(), 2);
        assert_eq!(analysis.tags, vec!["CW8", "WPEA"]);
        assert_eq!(analysis.consensus.as_deref(), Some("fort"));
    }

    #[test]
    fn test_parses_fenced_json_with_prose() {
        let answer = "Voici l'analyse :\n```json\n{\"category\": \"fiscalité\", \"summary\": \"PFU\", \"advice\": \"- Déclarer\\n- Opter pour le barème\"}\n```";
        let analysis = parse_analysis(answer, &categories()).unwrap();
        assert_eq!(analysis.category, "Fiscalite");
        assert_eq!(analysis.key_advice, vec!["Déclarer", "Opter pour le barème"]);
        assert!(analysis.tags.is_empty());
        assert!(analysis.consensus.is_none());
    }

    #[test]
    fn test_unknown_category_falls_back() {
        let analysis =
            parse_analysis(r#"{"category": "Voyage", "summary": "x"}"#, &categories()).unwrap();
        assert_eq!(analysis.category, "Autre");
    }

    #[test]
    fn test_tags_from_string_are_deduplicated_and_capped() {
        let answer = r##"{"category": "Crypto", "tags": "#btc, BTC, eth, defi, staking, ledger, nft"}"##;
        let analysis = parse_analysis(answer, &categories()).unwrap();
        assert_eq!(analysis.tags, vec!["btc", "eth", "defi", "staking", "ledger"]);
    }

    #[test]
    fn test_numbered_advice_is_cleaned() {
        let answer = r#"{"category": "Budget", "key_advice": ["1. Suivre ses dépenses", "2) Épargner 20%", ""]}"#;
        let analysis = parse_analysis(answer, &categories()).unwrap();
        assert_eq!(analysis.key_advice, vec!["Suivre ses dépenses", "Épargner 20%"]);
    }

    #[test]
    fn test_decimal_advice_keeps_leading_digits() {
        let answer = r#"{"category": "ETF", "key_advice": ["0.2% de frais maximum", "3.5 ans d'epargne de precaution", "2) Garder 1.5 mois de charges"]}"#;
        let analysis = parse_analysis(answer, &categories()).unwrap();
        assert_eq!(
            analysis.key_advice,
            vec![
                "0.2% de frais maximum",
                "3.5 ans d'epargne de precaution",
                "Garder 1.5 mois de charges"
            ]
        );
    }

    #[test]
    fn test_consensus_normalisation() {
        assert_eq!(normalize_consensus("Divise").as_deref(), Some("divisé"));
        assert_eq!(normalize_consensus(" MOYEN ").as_deref(), Some("moyen"));
        assert_eq!(normalize_consensus("unanime"), None);
    }

    #[test]
    fn test_rejects_answer_without_json_or_category() {
        assert!(parse_analysis("Je ne sais pas.", &categories()).is_err());
        assert!(parse_analysis(r#"{"summary": "x"}"#, &categories()).is_err());
        assert!(parse_analysis("{not json}", &categories()).is_err());
    }
}
