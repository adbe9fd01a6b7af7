use crate::PROMPT_PLACEHOLDER;

const FALLBACK_FILE_STEM: &str = "generated_image";

/// Fills the instruction's placeholder with the user prompt. Templates without a
/// placeholder get the prompt appended so it is never dropped silently.
pub fn render_instruction(template: &str, prompt: &str) -> String {
    let prompt = prompt.trim();
    if template.contains(PROMPT_PLACEHOLDER) {
        template.replace(PROMPT_PLACEHOLDER, prompt)
    } else {
        format!("{}\n\nUser Prompt: \"{}\"", template.trim_end(), prompt)
    }
}

pub fn download_file_name(prompt: &str) -> String {
    let stem = prompt
        .split_whitespace()
        .map(|word| {
            word.to_lowercase()
                .chars()
                .map(|c| if is_unsafe_file_char(c) { '_' } else { c })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("_");

    if stem.is_empty() {
        format!("{FALLBACK_FILE_STEM}.png")
    } else {
        format!("{stem}.png")
    }
}

fn is_unsafe_file_char(c: char) -> bool {
    c.is_control() || matches!(c, '/' | '\\' | '"' | ':' | '*' | '?' | '<' | '>' | '|' | ';')
}

#[cfg(test)]
mod tests {
    use super::{download_file_name, render_instruction};

    #[test]
    fn render_replaces_placeholder() {
        let out = render_instruction("User Prompt: \"{{prompt}}\"", "  a cat ");
        assert_eq!(out, "User Prompt: \"a cat\"");
    }

    #[test]
    fn render_appends_prompt_when_placeholder_missing() {
        let out = render_instruction("Draw this.\n", "a cat");
        assert_eq!(out, "Draw this.\n\nUser Prompt: \"a cat\"");
    }

    #[test]
    fn file_name_collapses_whitespace_and_lowercases() {
        assert_eq!(
            download_file_name("  A Fluffy\t\tGinger  Cat "),
            "a_fluffy_ginger_cat.png"
        );
    }

    #[test]
    fn file_name_falls_back_for_blank_prompt() {
        assert_eq!(download_file_name(""), "generated_image.png");
        assert_eq!(download_file_name("   "), "generated_image.png");
    }

    #[test]
    fn file_name_replaces_path_and_quote_characters() {
        assert_eq!(download_file_name("cats/dogs \"x\""), "cats_dogs__x_.png");
    }
}
