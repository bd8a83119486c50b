/// Intents the router knows how to dispatch. Anything else is an unroutable tier-2 miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    FormFilling,
    ImageGeneration,
    RssAnalysis,
    StatusQuery,
    Help,
    Greeting,
    Cancel,
}

impl IntentKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "form_filling_intent" => IntentKind::FormFilling,
            "image_generation_intent" => IntentKind::ImageGeneration,
            "rss_analysis_intent" => IntentKind::RssAnalysis,
            "status_query_intent" => IntentKind::StatusQuery,
            "help_intent" => IntentKind::Help,
            "greeting_intent" => IntentKind::Greeting,
            "cancel_intent" => IntentKind::Cancel,
            _ => return None,
        })
    }

    /// Context opened when this intent matches: (name, lifespan in turns).
    /// RSS analysis only opens its context while it still waits for a URL.
    pub fn context_policy(self) -> Option<(&'static str, u32)> {
        match self {
            IntentKind::FormFilling => Some(("form_filling", 5)),
            IntentKind::ImageGeneration => Some(("image_generation", 3)),
            IntentKind::RssAnalysis => Some(("rss_analysis", 2)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_policies() {
        assert_eq!(IntentKind::from_name("greeting_intent"), Some(IntentKind::Greeting));
        assert_eq!(IntentKind::from_name("weather_intent"), None);
        assert_eq!(IntentKind::FormFilling.context_policy(), Some(("form_filling", 5)));
        assert_eq!(IntentKind::ImageGeneration.context_policy(), Some(("image_generation", 3)));
        assert_eq!(IntentKind::Help.context_policy(), None);
    }
}
