use serde::{Deserialize, Serialize};

use crate::types::{Article, ArticleId};

/// Upstream annotation defects. Tolerated as legitimate low-overlap input,
/// never raised as errors; the cycle logs a tally every batch so gaps are
/// visible instead of silently degrading match quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationDefect {
    /// No nucleus entity extracted. The article can never link or match on
    /// nucleus, which caps clustering link strength at 0.7 and fingerprint
    /// similarity at 0.5 under default weights.
    EmptyNucleus,
    /// No core actors extracted.
    NoCoreActors,
    /// No actors at all, core or peripheral.
    NoActors,
}

pub fn flag_article(article: &Article) -> Vec<AnnotationDefect> {
    let mut defects = Vec::new();
    if !article.has_nucleus() {
        defects.push(AnnotationDefect::EmptyNucleus);
    }
    if article.core_actors.is_empty() {
        defects.push(AnnotationDefect::NoCoreActors);
    }
    if article.all_actors.is_empty() && article.core_actors.is_empty() {
        defects.push(AnnotationDefect::NoActors);
    }
    defects
}

/// Annotation quality tally for one batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchQuality {
    pub scanned: usize,
    pub empty_nucleus: Vec<ArticleId>,
    pub no_core_actors: Vec<ArticleId>,
    pub no_actors: Vec<ArticleId>,
}

impl BatchQuality {
    pub fn is_clean(&self) -> bool {
        self.empty_nucleus.is_empty() && self.no_core_actors.is_empty() && self.no_actors.is_empty()
    }
}

pub fn assess_batch(articles: &[Article]) -> BatchQuality {
    let mut quality = BatchQuality {
        scanned: articles.len(),
        ..Default::default()
    };
    for article in articles {
        for defect in flag_article(article) {
            match defect {
                AnnotationDefect::EmptyNucleus => quality.empty_nucleus.push(article.id),
                AnnotationDefect::NoCoreActors => quality.no_core_actors.push(article.id),
                AnnotationDefect::NoActors => quality.no_actors.push(article.id),
            }
        }
    }
    quality
}
