//! Template resolver.
//!
//! Looks a template up in the recipient's context, then in the global
//! context, and renders `{{name}}` placeholders by plain substitution.

use serde::Deserialize;
use thiserror::Error;

use herald_common::error::AppError;
use herald_common::types::{GLOBAL_CONTEXT, Template, TypeChannel, Variables};
use herald_store::Store;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Template not found for {0}")]
    NotFound(TypeChannel),

    #[error(transparent)]
    Store(#[from] AppError),
}

/// Content of an email template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EmailContent {
    pub subject: String,
    pub body: String,
}

#[derive(Clone)]
pub struct TemplateResolver {
    store: Store,
}

impl TemplateResolver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// The template of `context`, falling back to the global one.
    pub async fn find(
        &self,
        context: &str,
        type_channel: TypeChannel,
    ) -> Result<Option<Template>, AppError> {
        if let Some(template) = self.store.get_template(context, type_channel).await? {
            return Ok(Some(template));
        }
        if context == GLOBAL_CONTEXT {
            return Ok(None);
        }
        let global = self.store.get_template(GLOBAL_CONTEXT, type_channel).await?;
        if global.is_some() {
            tracing::debug!(context, %type_channel, "Using global template");
        }
        Ok(global)
    }

    /// Resolve and render the template for a recipient.
    pub async fn resolve(
        &self,
        context: &str,
        type_channel: TypeChannel,
        variables: &Variables,
    ) -> Result<String, ResolveError> {
        let template = self
            .find(context, type_channel)
            .await?
            .ok_or(ResolveError::NotFound(type_channel))?;
        Ok(render(&template.content, variables))
    }
}

/// Replace every `{{name}}` with its value. Unknown names are left as they are.
pub fn render(content: &str, variables: &Variables) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + len;
        out.push_str(&rest[..start]);
        match variables.get(rest[start + 2..end].trim()) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..end + 2]),
        }
        rest = &rest[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Names of the placeholders used in `content`, in order of appearance.
pub fn placeholders(content: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        names.push(rest[start + 2..start + 2 + len].trim());
        rest = &rest[start + 4 + len..];
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_known_names() {
        let rendered = render(
            "[{{status}}] {{serverName}} in {{ environment }}",
            &vars(&[
                ("status", "DOWN"),
                ("serverName", "db-1"),
                ("environment", "prod"),
            ]),
        );
        assert_eq!(rendered, "[DOWN] db-1 in prod");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let rendered = render("{{title}}: {{message}}", &vars(&[("title", "Hi")]));
        assert_eq!(rendered, "Hi: {{message}}");
    }

    #[test]
    fn test_render_does_not_escape_and_works_on_raw_json() {
        let rendered = render(
            r#"{"subject":"{{title}}","body":"{{message}}"}"#,
            &vars(&[("title", "<b>"), ("message", "ok")]),
        );
        assert_eq!(rendered, r#"{"subject":"<b>","body":"ok"}"#);
    }

    #[test]
    fn test_render_unterminated_placeholder() {
        assert_eq!(render("a {{b", &Variables::new()), "a {{b");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders("{{ title }} and {{actionUrl}} {{"),
            vec!["title", "actionUrl"]
        );
        assert!(placeholders("plain").is_empty());
    }
}
