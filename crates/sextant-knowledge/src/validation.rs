//! Validation for data entering the knowledge store.

use crate::error::{KnowledgeError, Result};
use crate::types::{EntityData, Learning};

/// Specific validation failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("entity id is empty")]
    EmptyId,

    #[error("{0} content is empty")]
    EmptyContent(&'static str),

    /// Confidence score is out of valid range (0.0-1.0).
    #[error("confidence score {0} is out of range [0.0, 1.0]")]
    InvalidConfidence(f32),

    #[error("embedding is empty")]
    EmptyEmbedding,

    /// Embedding contains invalid values (NaN or Inf).
    #[error("embedding contains {count} invalid values (NaN or Inf)")]
    InvalidEmbeddingValues { count: usize },
}

impl From<ValidationError> for KnowledgeError {
    fn from(err: ValidationError) -> Self {
        KnowledgeError::InvalidData(err.to_string())
    }
}

pub fn validate_confidence(score: f32) -> std::result::Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&score) {
        return Err(ValidationError::InvalidConfidence(score));
    }
    Ok(())
}

pub fn validate_embedding(embedding: &[f32]) -> std::result::Result<(), ValidationError> {
    if embedding.is_empty() {
        return Err(ValidationError::EmptyEmbedding);
    }
    let count = embedding.iter().filter(|v| !v.is_finite()).count();
    if count > 0 {
        return Err(ValidationError::InvalidEmbeddingValues { count });
    }
    Ok(())
}

fn validate_learning(learning: &Learning) -> std::result::Result<(), ValidationError> {
    if learning.content.trim().is_empty() {
        return Err(ValidationError::EmptyContent("learning"));
    }
    if let Some(c) = learning.confidence {
        validate_confidence(c)?;
    }
    Ok(())
}

/// Validate an entity payload and optional vector before writing.
pub fn validate_entity(data: &EntityData, embedding: Option<&[f32]>) -> Result<()> {
    if data.id().trim().is_empty() {
        return Err(ValidationError::EmptyId.into());
    }
    match data {
        EntityData::Learning(l) => validate_learning(l)?,
        EntityData::Topic(t) => {
            if t.content.trim().is_empty() {
                return Err(ValidationError::EmptyContent("topic").into());
            }
            validate_confidence(t.confidence)?;
        }
        EntityData::Pattern(p) if p.name.trim().is_empty() => {
            return Err(ValidationError::EmptyContent("pattern").into());
        }
        EntityData::Mistake(m) if m.description.trim().is_empty() => {
            return Err(ValidationError::EmptyContent("mistake").into());
        }
        _ => {}
    }
    if let Some(e) = embedding {
        validate_embedding(e)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Pattern, Topic};

    #[test]
    fn test_validate_confidence() {
        assert!(validate_confidence(0.0).is_ok());
        assert!(validate_confidence(1.0).is_ok());
        assert!(validate_confidence(1.01).is_err());
        assert!(validate_confidence(f32::NAN).is_err());
    }

    #[test]
    fn test_validate_embedding() {
        assert!(validate_embedding(&[0.1, 0.2]).is_ok());
        assert!(matches!(
            validate_embedding(&[]),
            Err(ValidationError::EmptyEmbedding)
        ));
        assert!(matches!(
            validate_embedding(&[f32::NAN, f32::INFINITY, 1.0]),
            Err(ValidationError::InvalidEmbeddingValues { count: 2 })
        ));
    }

    #[test]
    fn test_validate_entity() {
        let ok = EntityData::Learning(Learning::new("L1", "content"));
        assert!(validate_entity(&ok, None).is_ok());

        let empty_id = EntityData::Learning(Learning::new(" ", "content"));
        assert!(matches!(
            validate_entity(&empty_id, None),
            Err(KnowledgeError::InvalidData(_))
        ));

        let bad_conf = EntityData::Learning(Learning::new("L1", "c").with_confidence(2.0));
        assert!(validate_entity(&bad_conf, None).is_err());

        let empty_pattern = EntityData::Pattern(Pattern::new("P1", "", "desc"));
        assert!(validate_entity(&empty_pattern, None).is_err());

        let topic = EntityData::Topic(Topic::new("T1", "talk"));
        assert!(validate_entity(&topic, Some(&[f32::NAN])).is_err());
    }
}
