use assetforge_contracts::assets::{AssetTypeConfig, StyleFragments};
use thiserror::Error;

pub const TRANSPARENCY_SENTENCE: &str = "Transparent/alpha background, no background elements.";

const DESCRIPTION_PLACEHOLDER: &str = "description";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("prompt template references unknown placeholder '{{{0}}}'; only {{description}} is available")]
    UnknownPlaceholder(String),
    #[error("prompt template has an unmatched '{0}' at byte {1}")]
    UnbalancedBrace(char, usize),
}

/// Substitutes `{description}`. `{{` and `}}` produce literal braces.
pub fn render_template(template: &str, description: &str) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len() + description.len());
    let mut chars = template.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '{' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut name = String::new();
                let mut closed = false;
                for (_, inner) in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    if inner == '{' {
                        return Err(TemplateError::UnbalancedBrace('{', idx));
                    }
                    name.push(inner);
                }
                if !closed {
                    return Err(TemplateError::UnbalancedBrace('{', idx));
                }
                if name != DESCRIPTION_PLACEHOLDER {
                    return Err(TemplateError::UnknownPlaceholder(name));
                }
                out.push_str(description);
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                    out.push('}');
                    continue;
                }
                return Err(TemplateError::UnbalancedBrace('}', idx));
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Builds the full generation prompt. Pure; empty sources produce no line.
pub fn assemble(
    style: &StyleFragments,
    type_config: &AssetTypeConfig,
    description: &str,
    transparent: bool,
) -> Result<String, TemplateError> {
    let subject = render_template(&type_config.prompt_template, description)?;

    let mut technical = type_config.technical_params.trim().to_string();
    if transparent && !technical.to_lowercase().contains("transparent") {
        if !technical.is_empty() {
            technical.push(' ');
        }
        technical.push_str(TRANSPARENCY_SENTENCE);
    }

    // (text, blank line before when not first)
    let sections = [
        (style.preamble.clone(), false),
        (labeled("Subject", &subject), true),
        (labeled("Framing", &type_config.framing), false),
        (labeled("Technical", &technical), false),
        (labeled("Art style", &style.style_keywords), false),
        (style.negative_prompt.clone(), true),
    ];

    let mut prompt = String::new();
    for (text, spaced) in sections {
        if text.trim().is_empty() {
            continue;
        }
        if !prompt.is_empty() {
            prompt.push('\n');
            if spaced {
                prompt.push('\n');
            }
        }
        prompt.push_str(&text);
    }
    Ok(prompt)
}

fn labeled(label: &str, text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    format!("{label}: {text}")
}
