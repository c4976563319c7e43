use serde::{Deserialize, Serialize};

pub const FALLBACK_CATEGORY: &str = "Autre";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub name: String,
    pub description: String,
}

impl CategoryDef {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

/// The closed set of labels the AI pass may assign. Anything it answers
/// outside this set collapses to the fallback category.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorySet {
    categories: Vec<CategoryDef>,
    fallback: String,
}

impl CategorySet {
    pub fn new(mut categories: Vec<CategoryDef>) -> Self {
        if !categories
            .iter()
            .any(|c| fold(&c.name) == fold(FALLBACK_CATEGORY))
        {
            categories.push(CategoryDef::new(
                FALLBACK_CATEGORY,
                "Sujets ne rentrant dans aucune autre catégorie",
            ));
        }
        Self {
            categories,
            fallback: FALLBACK_CATEGORY.to_string(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &CategoryDef> {
        self.categories.iter()
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Maps a free-form label onto a configured category name, ignoring
    /// case, accents and surrounding punctuation.
    pub fn resolve(&self, raw: &str) -> String {
        let wanted = fold(raw.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '.'));
        if wanted.is_empty() {
            return self.fallback.clone();
        }
        self.categories
            .iter()
            .find(|c| fold(&c.name) == wanted)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self::new(default_categories())
    }
}

pub fn default_categories() -> Vec<CategoryDef> {
    vec![
        CategoryDef::new("ETF", "Posts sur les ETF (CW8, WPEA, S&P500, MSCI World, Nasdaq, etc.)"),
        CategoryDef::new("Immobilier", "SCPI, résidence principale (RP), investissement locatif, crédit immo, LMNP"),
        CategoryDef::new("Crypto", "Bitcoin, Ethereum, cryptomonnaies, DeFi, staking"),
        CategoryDef::new("Epargne", "Livrets (A, LDDS), assurance-vie, PEA, épargne de précaution, fonds euros"),
        CategoryDef::new("Fiscalite", "Impôts, déclarations, optimisation fiscale, niches fiscales, PFU"),
        CategoryDef::new("Actions", "Stock picking, actions individuelles, dividendes, analyse fondamentale"),
        CategoryDef::new("Strategie", "DCA, allocation d'actifs, diversification, rééquilibrage"),
        CategoryDef::new("Milestone", "Réussites financières avec montants (ex: 'J'ai atteint 100k€', 'premier million')"),
        CategoryDef::new("Question", "Cas pratique personnel demandant des conseils (ex: 'J'ai 25 ans, 30k€, que faire?')"),
        CategoryDef::new("Retour XP", "Retours d'expérience détaillés sur un investissement, courtier, ou stratégie"),
        CategoryDef::new("Budget", "Gestion de budget, suivi des dépenses, épargne mensuelle, taux d'épargne"),
        CategoryDef::new("Retraite", "Préparation retraite, PER, PERCO, PERCOL, simulation retraite, trimestres"),
        CategoryDef::new("Credit", "Crédits conso, prêts immo, rachat de crédit, remboursement anticipé, taux"),
        CategoryDef::new("Carriere", "Salaire, négociation salariale, reconversion pro liée aux finances, freelance"),
        CategoryDef::new("Actualite", "News financières, changements de loi, évolution des taux, réforme"),
        CategoryDef::new(FALLBACK_CATEGORY, "Sujets ne rentrant dans AUCUNE autre catégorie (utiliser en dernier recours)"),
    ]
}

fn fold(text: &str) -> String {
    text.chars()
        .flat_map(|c| c.to_lowercase())
        .map(|c| match c {
            'à' | 'â' | 'ä' | 'á' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' | 'í' => 'i',
            'ô' | 'ö' | 'ó' => 'o',
            'ù' | 'û' | 'ü' | 'ú' => 'u',
            'ç' => 'c',
            '-' | '_' => ' ',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
