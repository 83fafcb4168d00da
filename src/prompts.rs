pub const TEXT_ANALYSIS: &str = include_str!("../data/prompts/text_analysis.txt");
pub const TITLE_GENERATION: &str = include_str!("../data/prompts/title_generation.txt");
pub const FORMAT: &str = include_str!("../data/prompts/format.txt");
pub const FORMAT_USER: &str = include_str!("../data/prompts/format_user.txt");
pub const IMAGE_DESCRIPTION: &str = include_str!("../data/prompts/image_description.txt");

/// Replace `{{key}}` placeholders in a template string.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{{{}}}}}", key), value);
    }
    result
}
