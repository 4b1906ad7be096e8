//! Error types for queries, templates and mapping tables.

use thiserror::Error;

/// Result type alias for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors raised while compiling or evaluating extraction rules.
///
/// A field that yields nothing is not an error: the pipeline records it as
/// an empty-field diagnostic instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// A path query could not be parsed.
    #[error("Invalid query '{query}' at position {position}: {message}")]
    QuerySyntax {
        query: String,
        position: usize,
        message: String,
    },

    /// A query function was called with the wrong number or type of
    /// arguments.
    #[error("Query function {function}(): {message}")]
    QueryFunction { function: String, message: String },

    /// A template could not be parsed.
    #[error("Invalid template at position {position}: {message}")]
    TemplateSyntax { position: usize, message: String },

    /// A template failed while rendering.
    #[error("Template render failed: {0}")]
    TemplateRender(String),

    /// A template referenced a filter that does not exist.
    #[error("Unknown template filter '{0}'")]
    UnknownFilter(String),

    /// A mapping table could not be read or parsed.
    #[error("Failed to load mapping from {source_name}: {message}")]
    MappingLoad {
        source_name: String,
        message: String,
    },

    /// No mapping table is defined for a platform.
    #[error("No mapping defined for platform '{0}'")]
    UnknownPlatform(String),

    /// A platform's mapping has no table for a sync job.
    #[error("Platform '{platform}' has no mapping for job '{job}'")]
    UnknownJob { platform: String, job: String },
}

impl ExtractError {
    /// Creates a query syntax error.
    pub fn query_syntax(query: &str, position: usize, message: impl Into<String>) -> Self {
        Self::QuerySyntax {
            query: query.to_string(),
            position,
            message: message.into(),
        }
    }

    /// Creates a query function error.
    pub fn query_function(function: &str, message: impl Into<String>) -> Self {
        Self::QueryFunction {
            function: function.to_string(),
            message: message.into(),
        }
    }

    /// Creates a template syntax error.
    pub fn template_syntax(position: usize, message: impl Into<String>) -> Self {
        Self::TemplateSyntax {
            position,
            message: message.into(),
        }
    }

    /// Creates a template render error.
    pub fn render(message: impl Into<String>) -> Self {
        Self::TemplateRender(message.into())
    }

    /// Creates a mapping load error.
    pub fn mapping_load(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::MappingLoad {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if the error comes from the rule itself (syntax or an
    /// unknown name) rather than from the data it was applied to.
    pub fn is_rule_error(&self) -> bool {
        matches!(
            self,
            ExtractError::QuerySyntax { .. }
                | ExtractError::TemplateSyntax { .. }
                | ExtractError::UnknownFilter(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ExtractError::query_syntax("a.[", 2, "unexpected end of input");
        assert_eq!(
            err.to_string(),
            "Invalid query 'a.[' at position 2: unexpected end of input"
        );
        assert!(err.is_rule_error());
        assert!(!ExtractError::render("boom").is_rule_error());
    }
}
