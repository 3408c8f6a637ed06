use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

use crate::usage::ChangeDirection;

const DEFAULT_INCREASE: &str = "Water usage for {{ device_name }} rose {{ percent }}% compared to yesterday ({{ yesterday }} L to {{ today }} L). Check for leaks or taps left running.";
const DEFAULT_DECREASE: &str = "Nice work! Water usage for {{ device_name }} dropped {{ percent }}% compared to yesterday ({{ yesterday }} L to {{ today }} L).";
const DEFAULT_UNCHANGED: &str = "Water usage for {{ device_name }} is the same as yesterday ({{ today }} L).";

/// Optional replacements for the built-in copy, read from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateOverrides {
    pub increase: Option<String>,
    pub decrease: Option<String>,
    pub unchanged: Option<String>,
}

/// Tera templates for the three kinds of change message.
///
/// Available variables: `device_name`, `percent` (absolute value, two
/// decimals), `yesterday` and `today` (litres, two decimals).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplates {
    pub increase: String,
    pub decrease: String,
    pub unchanged: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            increase: DEFAULT_INCREASE.to_string(),
            decrease: DEFAULT_DECREASE.to_string(),
            unchanged: DEFAULT_UNCHANGED.to_string(),
        }
    }
}

impl MessageTemplates {
    pub fn with_overrides(overrides: &TemplateOverrides) -> Self {
        let defaults = Self::default();
        Self {
            increase: overrides.increase.clone().unwrap_or(defaults.increase),
            decrease: overrides.decrease.clone().unwrap_or(defaults.decrease),
            unchanged: overrides.unchanged.clone().unwrap_or(defaults.unchanged),
        }
    }

    pub fn template_for(&self, direction: ChangeDirection) -> &str {
        match direction {
            ChangeDirection::Increase => &self.increase,
            ChangeDirection::Decrease => &self.decrease,
            ChangeDirection::Unchanged => &self.unchanged,
        }
    }

    pub fn render(
        &self,
        direction: ChangeDirection,
        device_name: &str,
        percent: f64,
        yesterday: f64,
        today: f64,
    ) -> Result<String, tera::Error> {
        let mut context = Context::new();
        context.insert("device_name", device_name);
        context.insert("percent", &format!("{:.2}", percent.abs()));
        context.insert("yesterday", &format!("{yesterday:.2}"));
        context.insert("today", &format!("{today:.2}"));
        Tera::one_off(self.template_for(direction), &context, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_absolute_percent() {
        let templates = MessageTemplates::default();
        let text = templates
            .render(ChangeDirection::Decrease, "Kitchen", -25.0, 200.0, 150.0)
            .unwrap();
        assert!(text.contains("Kitchen"));
        assert!(text.contains("25.00%"));
        assert!(text.contains("200.00 L to 150.00 L"));
    }

    #[test]
    fn overrides_replace_only_given_templates() {
        let templates = MessageTemplates::with_overrides(&TemplateOverrides {
            increase: Some("Pemakaian air {{ device_name }} naik {{ percent }}%".to_string()),
            ..Default::default()
        });
        let text = templates
            .render(ChangeDirection::Increase, "Dapur", 50.0, 100.0, 150.0)
            .unwrap();
        assert_eq!(text, "Pemakaian air Dapur naik 50.00%");
        assert_eq!(templates.unchanged, DEFAULT_UNCHANGED);
    }
}
