use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Placeholder name → value, filling exactly one template.
pub type GenerationRequest = HashMap<String, String>;

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("template `{template}` has no value for placeholder `{placeholder}`")]
    MissingValue {
        template: String,
        placeholder: String,
    },
    #[error("template `{template}` has an unterminated placeholder at byte {offset}")]
    Unterminated { template: String, offset: usize },
    #[error("template `{template}` uses `{{{placeholder}}}`, which is never filled; available: {available}")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
        available: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A prompt string with `{name}` placeholders. `{{` and `}}` are literal braces.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(name: &str, source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut key = String::new();
                    let mut closed = false;
                    for (_, k) in chars.by_ref() {
                        if k == '}' {
                            closed = true;
                            break;
                        }
                        key.push(k);
                    }
                    if !closed {
                        return Err(TemplateError::Unterminated {
                            template: name.to_string(),
                            offset,
                        });
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(key.trim().to_string()));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            name: name.to_string(),
            segments,
        })
    }

    fn placeholders(&self) -> BTreeSet<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(p) => Some(p.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Fails on the first placeholder outside `known`, so a bad prompt
    /// override is caught before any generation starts.
    pub fn check_placeholders(&self, known: &[&str]) -> Result<(), TemplateError> {
        match self.placeholders().into_iter().find(|p| !known.contains(p)) {
            Some(unknown) => Err(TemplateError::UnknownPlaceholder {
                template: self.name.clone(),
                placeholder: unknown.to_string(),
                available: known.join(", "),
            }),
            None => Ok(()),
        }
    }

    pub fn render(&self, request: &GenerationRequest) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(key) => {
                    let value = request.get(key).ok_or_else(|| TemplateError::MissingValue {
                        template: self.name.clone(),
                        placeholder: key.clone(),
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Parses and renders in one step.
pub fn fill(name: &str, source: &str, request: &GenerationRequest) -> Result<String, TemplateError> {
    Template::parse(name, source)?.render(request)
}

/// Builds a request from `(key, value)` pairs.
pub fn request<I, K, V>(pairs: I) -> GenerationRequest
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fills_placeholders() {
        let req = request([("genre", "noir"), ("author", "Chandler")]);
        let out = fill("t", "A {genre} story in the style of { author }.", &req).unwrap();
        assert_eq!(out, "A noir story in the style of Chandler.");
    }

    #[test]
    fn test_missing_value_is_an_error() {
        let req = request([("genre", "noir")]);
        let err = fill("title", "{genre} / {plot}", &req).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingValue {
                template: "title".to_string(),
                placeholder: "plot".to_string(),
            }
        );
    }

    #[test]
    fn test_escaped_braces_are_literal() {
        let req = GenerationRequest::new();
        let out = fill("json", "Return {{\"name\": \"...\"}}", &req).unwrap();
        assert_eq!(out, "Return {\"name\": \"...\"}");
    }

    #[test]
    fn test_unterminated_placeholder() {
        assert!(matches!(
            Template::parse("bad", "hello {world"),
            Err(TemplateError::Unterminated { offset: 6, .. })
        ));
    }

    #[test]
    fn test_placeholders_are_collected() {
        let t = Template::parse("p", "{a} {b} {a}").unwrap();
        assert_eq!(t.placeholders().into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_placeholder_is_reported() {
        let t = Template::parse("title", "{genre} by {autor}").unwrap();
        assert!(t.check_placeholders(&["genre", "author"]).is_err());
        assert!(matches!(
            t.check_placeholders(&["genre"]),
            Err(TemplateError::UnknownPlaceholder { placeholder, .. }) if placeholder == "autor"
        ));
        assert!(Template::parse("t", "{genre}")
            .unwrap()
            .check_placeholders(&["genre", "author"])
            .is_ok());
    }
}
