//! Template lookup and rendering.
//!
//! Templates are plain HTML with Handlebars placeholders (`{{ name }}`,
//! `{{{ raw }}}`, dotted paths like `{{ user.name }}`). Before rendering, every
//! placeholder must have a value in the supplied data; the compiler reports
//! all missing names at once instead of rendering an incomplete message.

mod repository;

pub use repository::{InMemoryTemplateRepository, TemplateRepository};

#[cfg(test)]
pub use repository::MockTemplateRepository;

use crate::error::{MailError, MailResult};
use crate::models::CompiledMessage;
use handlebars::Handlebars;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, LazyLock};
use tracing::debug;
use uuid::Uuid;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{~?\{?~?\s*&?\s*([^{}\s~]+)\s*~?\}?~?\}\}")
        .expect("placeholder pattern is valid")
});

/// Block helpers, comments, partials and context references are Handlebars
/// syntax, not data lookups. Whitespace control (`~`) and the unescaped
/// marker (`&`) are consumed by the pattern and never reach the token.
fn is_data_reference(token: &str) -> bool {
    !(token.starts_with(['#', '/', '!', '>', '^', '@'])
        || token.starts_with("..")
        || token == "else"
        || token == "this"
        || token.starts_with("this."))
}

/// Names referenced by `body`, de-duplicated, in first-seen order.
pub fn required_placeholders(body: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for captures in PLACEHOLDER.captures_iter(body) {
        let token = &captures[1];
        if is_data_reference(token) && !names.iter().any(|n| n == token) {
            names.push(token.to_string());
        }
    }
    names
}

/// Whether `path` (dot separated) resolves in `data`. A key holding `null`
/// still counts as present.
fn has_path(data: &Map<String, Value>, path: &str) -> bool {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return false;
    };
    let Some(mut current) = data.get(first) else {
        return false;
    };

    for segment in segments {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return false,
        }
    }
    true
}

/// Placeholders of `body` with no value in `data`, in first-seen order.
pub fn missing_variables(body: &str, data: &Map<String, Value>) -> Vec<String> {
    required_placeholders(body)
        .into_iter()
        .filter(|name| !has_path(data, name))
        .collect()
}

/// Looks up an owner's template, checks the data covers it and renders it.
#[derive(Clone)]
pub struct TemplateCompiler {
    repository: Arc<dyn TemplateRepository>,
    handlebars: Arc<Handlebars<'static>>,
}

impl TemplateCompiler {
    pub fn new(repository: Arc<dyn TemplateRepository>) -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        Self {
            repository,
            handlebars: Arc::new(handlebars),
        }
    }

    /// Render template `template_id` of `owner_id` with `data`.
    ///
    /// Fails with [`MailError::TemplateNotFound`] when the owner has no such
    /// template and with [`MailError::MissingVariables`] when any placeholder
    /// is absent from `data`. Keys not referenced by the template are ignored.
    pub async fn compile(
        &self,
        owner_id: Uuid,
        template_id: Uuid,
        data: Map<String, Value>,
    ) -> MailResult<CompiledMessage> {
        let template = self
            .repository
            .get_template(owner_id, template_id)
            .await?
            .ok_or(MailError::TemplateNotFound {
                owner_id,
                template_id,
            })?;

        let missing = missing_variables(&template.html, &data);
        if !missing.is_empty() {
            debug!(
                template_id = %template_id,
                missing = ?missing,
                "Template data incomplete"
            );
            return Err(MailError::MissingVariables(missing));
        }

        let html = self.handlebars.render_template(&template.html, &data)?;

        debug!(
            template_id = %template_id,
            template_name = %template.name,
            bytes = html.len(),
            "Compiled template"
        );

        Ok(CompiledMessage { html, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::Template;
    use serde_json::json;

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_required_placeholders_dedup_in_order() {
        let names = required_placeholders("{{b}} {{ a }} {{b}} {{{ c }}} {{a}}");
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_required_placeholders_skip_block_syntax() {
        let body = "{{#if vip}}Dear {{name}}{{else}}Hi{{/if}} {{! note }} {{#each items}}{{this}}{{/each}}";
        assert_eq!(required_placeholders(body), vec!["name"]);
    }

    #[test]
    fn test_required_placeholders_whitespace_control() {
        assert_eq!(required_placeholders("Hello {{~name}}!"), vec!["name"]);
        assert_eq!(required_placeholders("Hello {{name~}}!"), vec!["name"]);
        assert_eq!(required_placeholders("Hello {{~ name ~}}!"), vec!["name"]);
        assert_eq!(required_placeholders("{{~{ raw }~}} {{& other}}"), vec!["raw", "other"]);

        let supplied = data(json!({ "name": "Ann" }));
        assert!(missing_variables("Hello {{name~}}!", &supplied).is_empty());
        assert_eq!(missing_variables("Hello {{~name}}!", &Map::new()), vec!["name"]);
    }

    #[test]
    fn test_missing_variables_dotted_paths() {
        let body = "{{user.name}} lives in {{user.address.city}}";
        let data = data(json!({ "user": { "name": "Ann", "address": {} } }));
        assert_eq!(missing_variables(body, &data), vec!["user.address.city"]);
    }

    #[test]
    fn test_null_value_counts_as_present() {
        let data = data(json!({ "name": null }));
        assert!(missing_variables("Hello {{name}}", &data).is_empty());
    }

    #[tokio::test]
    async fn test_compile_renders_and_escapes() {
        let owner = Uuid::now_v7();
        let repository = InMemoryTemplateRepository::new();
        let template = repository
            .insert(Template::new(owner, "greeting", "<p>Hello {{name}}</p>{{{footer}}}"))
            .await;

        let compiler = TemplateCompiler::new(Arc::new(repository));
        let compiled = compiler
            .compile(
                owner,
                template.id,
                data(json!({ "name": "<Ann>", "footer": "<hr>", "unused": 1 })),
            )
            .await
            .unwrap();

        assert_eq!(compiled.html, "<p>Hello &lt;Ann&gt;</p><hr>");
        assert_eq!(compiled.data["unused"], 1);
    }

    #[tokio::test]
    async fn test_compile_checks_whitespace_controlled_placeholders() {
        let owner = Uuid::now_v7();
        let repository = InMemoryTemplateRepository::new();
        let template = repository
            .insert(Template::new(owner, "tight", "Hello {{~ name ~}} !"))
            .await;
        let compiler = TemplateCompiler::new(Arc::new(repository));

        let err = compiler
            .compile(owner, template.id, Map::new())
            .await
            .unwrap_err();
        assert!(matches!(&err, MailError::MissingVariables(names) if names == &["name"]));

        let compiled = compiler
            .compile(owner, template.id, data(json!({ "name": "Ann" })))
            .await
            .unwrap();
        assert_eq!(compiled.html, "HelloAnn!");
    }

    #[tokio::test]
    async fn test_compile_reports_every_missing_name() {
        let owner = Uuid::now_v7();
        let repository = InMemoryTemplateRepository::new();
        let template = repository
            .insert(Template::new(owner, "t", "{{greeting}} {{name}}, {{sign_off}}"))
            .await;

        let compiler = TemplateCompiler::new(Arc::new(repository));
        let err = compiler
            .compile(owner, template.id, data(json!({ "name": "Ann" })))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.to_string(), "Missing variables: greeting, sign_off");
    }

    #[tokio::test]
    async fn test_compile_is_scoped_by_owner() {
        let owner = Uuid::now_v7();
        let mut mock = MockTemplateRepository::new();
        mock.expect_get_template()
            .with(
                mockall::predicate::eq(owner),
                mockall::predicate::always(),
            )
            .returning(|_, _| Ok(None));

        let compiler = TemplateCompiler::new(Arc::new(mock));
        let err = compiler
            .compile(owner, Uuid::now_v7(), Map::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_compile_is_idempotent() {
        let owner = Uuid::now_v7();
        let html = "Hi {{name}}".to_string();
        let mut mock = MockTemplateRepository::new();
        mock.expect_get_template().times(2).returning(move |owner_id, id| {
            Ok(Some(Template {
                id,
                owner_id,
                name: "hi".into(),
                html: html.clone(),
                created_at: chrono::Utc::now(),
            }))
        });

        let compiler = TemplateCompiler::new(Arc::new(mock));
        let id = Uuid::now_v7();
        let first = compiler.compile(owner, id, data(json!({ "name": "Ann" }))).await.unwrap();
        let second = compiler.compile(owner, id, data(json!({ "name": "Ann" }))).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.html, "Hi Ann");
    }
}
