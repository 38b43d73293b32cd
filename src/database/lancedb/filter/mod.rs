
use serde::{Deserialize, Serialize};

use super::{Metadata, MetadataValue};

/// Closed predicate language over entry metadata
///
/// Evaluation is total: a key absent from the metadata never matches, and an
/// empty conjunction matches everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataFilter {
    Eq { key: String, value: MetadataValue },
    In { key: String, values: Vec<MetadataValue> },
    And(Vec<MetadataFilter>),
}

impl MetadataFilter {
    #[inline]
    pub fn eq(key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::Eq {
            key: key.into(),
            value: value.into(),
        }
    }

    #[inline]
    pub fn is_in<V>(key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self
    where
        V: Into<MetadataValue>,
    {
        Self::In {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    #[inline]
    pub fn and(filters: impl IntoIterator<Item = MetadataFilter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    #[inline]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::Eq { key, value } => metadata
                .get(key)
                .is_some_and(|actual| actual.matches(value)),
            Self::In { key, values } => metadata
                .get(key)
                .is_some_and(|actual| values.iter().any(|value| actual.matches(value))),
            Self::And(filters) => filters.iter().all(|filter| filter.matches(metadata)),
        }
    }
}
