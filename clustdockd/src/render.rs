//! Profile attribute templating: every string value in a profile's attribute
//! bag is formatted against the node's own attributes before use.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("unknown placeholder '{{{0}}}' in template")]
    UnknownPlaceholder(String),
    #[error("unterminated '{{' in template")]
    Unterminated,
}

/// The node attributes a profile's template strings may reference.
pub struct TemplateContext<'a> {
    pub name: &'a str,
    pub idx: Option<u32>,
    pub clustername: &'a str,
    pub host: &'a str,
}

impl TemplateContext<'_> {
    fn resolve(&self, key: &str) -> Option<String> {
        match key {
            "name" => Some(self.name.to_string()),
            "idx" => self.idx.map(|i| i.to_string()),
            "clustername" => Some(self.clustername.to_string()),
            "host" => Some(self.host.to_string()),
            _ => None,
        }
    }
}

/// Expands every `{key}` placeholder in `template` against `ctx`. A
/// placeholder whose key isn't one of the four allowed attributes, or whose
/// value is absent (e.g. `{idx}` on a node with no index), is a
/// configuration error rather than a silently-empty substitution.
pub fn render_template(template: &str, ctx: &TemplateContext) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        match rest.find('{') {
            None => {
                out.push_str(rest);
                break;
            }
            Some(open) => {
                out.push_str(&rest[..open]);
                let after_open = &rest[open + 1..];
                let close = after_open
                    .find('}')
                    .ok_or(RenderError::Unterminated)?;
                let key = &after_open[..close];
                let value = ctx
                    .resolve(key)
                    .ok_or_else(|| RenderError::UnknownPlaceholder(key.to_string()))?;
                out.push_str(&value);
                rest = &after_open[close + 1..];
            }
        }
    }
    Ok(out)
}
