//! Related-article lookup for agents whose prompt uses `{articles}`.

use async_trait::async_trait;

use crate::error::Result;

/// Supplies reference text related to a question.
#[async_trait]
pub trait ArticleProvider: Send + Sync {
    /// Concatenated article text for `query`, at most `token_budget` tokens.
    async fn related_articles(&self, query: &str, token_budget: usize) -> Result<String>;
}

/// Fixed set of articles ranked by shared words with the query.
#[derive(Debug, Clone, Default)]
pub struct ArticleList {
    articles: Vec<String>,
}

impl ArticleList {
    pub fn new(articles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            articles: articles.into_iter().map(Into::into).collect(),
        }
    }
}

/// Rough token count: one token per four characters.
fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_lowercase)
}

#[async_trait]
impl ArticleProvider for ArticleList {
    async fn related_articles(&self, query: &str, token_budget: usize) -> Result<String> {
        let terms: Vec<String> = words(query).collect();
        let mut scored: Vec<(usize, &String)> = self
            .articles
            .iter()
            .map(|article| {
                let hits = words(article).filter(|w| terms.contains(w)).count();
                (hits, article)
            })
            .filter(|(hits, _)| *hits > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let mut used = 0;
        let mut picked = Vec::new();
        for (_, article) in scored {
            let cost = estimate_tokens(article);
            if used + cost > token_budget {
                break;
            }
            used += cost;
            picked.push(article.as_str());
        }
        Ok(picked.join("\n\n"))
    }
}
