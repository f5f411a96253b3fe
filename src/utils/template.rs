//! String template rendering utilities.

use std::collections::HashMap;

pub struct TemplateVars;

impl TemplateVars {
    pub const ARGUMENT: &'static str = "argument";
    pub const STACK_NAME: &'static str = "stack_name";
    pub const EXTERNAL_NAME: &'static str = "external_name";
    pub const PROJECT_CODE: &'static str = "project_code";
}

pub fn render_map(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}
