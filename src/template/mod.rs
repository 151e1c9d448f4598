//! HTML body rendering with handlebars.
//!
//! Templates are read from disk on every call and rendered against a flat
//! string map. Missing keys render empty; interpolated values are
//! HTML-escaped.

use handlebars::{Handlebars, Template};
use std::collections::HashMap;
use std::path::Path;

use crate::errors::{SmtpError, SmtpErrorKind, SmtpResult};

/// Renders HTML message bodies.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    registry: Handlebars<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    /// Creates a renderer in non-strict mode with HTML escaping.
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        Self { registry }
    }

    /// Reads, compiles and renders the template at `path`.
    pub fn render(
        &self,
        path: impl AsRef<Path>,
        bindings: &HashMap<String, String>,
    ) -> SmtpResult<Vec<u8>> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            SmtpError::template(
                SmtpErrorKind::TemplateNotFound,
                format!("Cannot read template {}: {}", path.display(), e),
            )
            .with_cause(e)
        })?;

        self.render_source(&source, bindings)
            .map_err(|e| SmtpError::template(e.kind(), format!("{}: {}", path.display(), e.message())))
    }

    /// Compiles and renders template text.
    pub fn render_source(
        &self,
        source: &str,
        bindings: &HashMap<String, String>,
    ) -> SmtpResult<Vec<u8>> {
        Template::compile(source).map_err(|e| {
            SmtpError::template(SmtpErrorKind::TemplateSyntax, e.to_string())
        })?;

        let rendered = self
            .registry
            .render_template(source, bindings)
            .map_err(|e| SmtpError::template(SmtpErrorKind::TemplateRender, e.to_string()))?;

        Ok(rendered.into_bytes())
    }
}

/// Renders the template at `path` with a default renderer.
pub fn render(path: impl AsRef<Path>, bindings: &HashMap<String, String>) -> SmtpResult<Vec<u8>> {
    TemplateRenderer::new().render(path, bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn template_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn bindings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_bindings() {
        let file = template_file("<p>{{year}}</p>");
        let body = render(file.path(), &bindings(&[("year", "2019")])).unwrap();
        assert_eq!(body, b"<p>2019</p>");
    }

    #[test]
    fn test_missing_key_renders_empty() {
        let file = template_file("<p>[{{name}}]</p>");
        let body = render(file.path(), &HashMap::new()).unwrap();
        assert_eq!(body, b"<p>[]</p>");
    }

    #[test]
    fn test_values_are_html_escaped() {
        let file = template_file("<div>{{note}}</div>");
        let body = render(
            file.path(),
            &bindings(&[("note", "<script>alert(\"x\") & 'y'</script>")]),
        )
        .unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains("&lt;script&gt;"));
        assert!(body.contains("&amp;"));
        assert!(body.contains("&quot;"));
        assert!(!body.contains("<script>"));
        assert!(!body.contains('\''));
    }

    #[test]
    fn test_render_is_deterministic() {
        let file = template_file("{{a}}-{{b}}");
        let values = bindings(&[("a", "1"), ("b", "2")]);
        let renderer = TemplateRenderer::new();
        let first = renderer.render(file.path(), &values).unwrap();
        let second = renderer.render(file.path(), &values).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_file() {
        let err = render("no-such.html", &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::TemplateNotFound);
        assert_eq!(err.category(), crate::errors::ErrorCategory::Template);
    }

    #[test]
    fn test_syntax_error() {
        let file = template_file("<p>{{#if year}}unclosed</p>");
        let err = render(file.path(), &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), SmtpErrorKind::TemplateSyntax);
    }
}
