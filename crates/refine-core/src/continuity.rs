//! Identifier continuity resolution
//!
//! Pure mapping from a classification to the identifier strategy used for
//! generation:
//!
//! | Intent            | Strategy               |
//! |-------------------|------------------------|
//! | `REFINEMENT`      | `PRESERVE_IDENTIFIERS` |
//! | `NEW_FEATURE`     | `SEARCH_INDEX`         |
//! | `COURSE_REVERSAL` | `FULL_REWRITE`         |
//! | `AMBIGUOUS`       | `ASK_USER`             |

use crate::error::RefineError;
use crate::types::{Clarification, Intent, IntentClassification, Strategy};

/// Resolve the identifier strategy for a classification
///
/// # Errors
/// [`RefineError::AmbiguityWithoutOptions`] when an ambiguous classification
/// carries fewer than two interpretations to offer.
pub fn resolve(classification: &IntentClassification) -> Result<Strategy, RefineError> {
    match classification.intent {
        Intent::Refinement => Ok(Strategy::PreserveIdentifiers),
        Intent::NewFeature => Ok(Strategy::SearchIndex),
        Intent::CourseReversal => Ok(Strategy::FullRewrite),
        Intent::Ambiguous => {
            let options = &classification.interpretations;
            if options.len() < 2 {
                return Err(RefineError::AmbiguityWithoutOptions {
                    found: options.len(),
                });
            }
            Ok(Strategy::AskUser(Clarification {
                question: question(options.len()),
                options: options.clone(),
            }))
        }
    }
}

fn question(count: usize) -> String {
    format!("Your request could mean {count} different things. Which one did you intend?")
}
