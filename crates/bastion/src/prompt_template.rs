use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

/// Render an operator editable prompt template against a serializable context
pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::HashMap;

    #[test]
    fn test_load_prompt() {
        let template = "The user asked: {{originalUserRequest}}";
        let mut context = HashMap::new();
        context.insert("originalUserRequest".to_string(), "list my files".to_string());

        let result = load_prompt(template, &context).unwrap();
        assert_eq!(result, "The user asked: list my files");
    }

    #[test]
    fn test_load_prompt_missing_variable() {
        let template = "{{question}} {{options}}";
        let mut context = HashMap::new();
        context.insert("question".to_string(), "Which?".to_string());
        assert!(load_prompt(template, &context).is_err());
    }

    #[test]
    fn test_values_are_not_rendered_or_escaped() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Ctx {
            tool_result_data: String,
        }

        // untrusted data that looks like template syntax or html stays inert
        let data = "{{ secrets }} <script>alert(1)</script> & \"quotes\"";
        let result = load_prompt(
            "Data: {{toolResultData}}",
            &Ctx {
                tool_result_data: data.to_string(),
            },
        )
        .unwrap();
        assert_eq!(result, format!("Data: {}", data));
    }
}
