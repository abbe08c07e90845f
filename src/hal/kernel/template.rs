use rustc_hash::FxHashMap as HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template error: no binding for placeholder `{0}`")]
    Missing(String),
    #[error("template error: unterminated placeholder at byte {0}")]
    Unterminated(usize),
}

/// Named substitutions for [`render`].
#[derive(Debug, Default, Clone)]
pub struct Bindings(HashMap<&'static str, String>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a binding.
    pub fn bind(mut self, name: &'static str, value: impl ToString) -> Self {
        self.0.insert(name, value.to_string());
        self
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Replaces every `{{name}}` placeholder in `template` with its binding.
///
/// Substituted text is not scanned again. Surrounding whitespace inside the braces is ignored.
pub fn render(template: &str, bindings: &Bindings) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let position = template.len() - rest.len() + start;
        let tail = &rest[start + 2..];
        let end = tail.find("}}").ok_or(TemplateError::Unterminated(position))?;
        let name = tail[..end].trim();
        let value = bindings
            .get(name)
            .ok_or_else(|| TemplateError::Missing(name.to_string()))?;
        output.push_str(value);
        rest = &tail[end + 2..];
    }
    output.push_str(rest);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::{Bindings, TemplateError, render};

    #[test]
    fn test_render() -> Result<(), TemplateError> {
        let bindings = Bindings::new()
            .bind("type", "f32")
            .bind("width", 4)
            .bind("nested", "{{type}}");
        let output = render("vec{{width}}<{{ type }}>; {{nested}}", &bindings)?;
        assert_eq!(output, "vec4<f32>; {{type}}");

        let output = render("fn main() { }", &bindings)?;
        assert_eq!(output, "fn main() { }");
        Ok(())
    }

    #[test]
    fn test_render_error() {
        let bindings = Bindings::new().bind("type", "f32");
        assert_eq!(
            render("{{type}} {{lanes}}", &bindings),
            Err(TemplateError::Missing("lanes".into()))
        );
        assert_eq!(
            render("ab {{type", &bindings),
            Err(TemplateError::Unterminated(3))
        );
    }
}
