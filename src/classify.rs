//! App and place classifiers.
//!
//! Both classifiers run inline inside larger derivations, so they are
//! pure and total: they never fail and always return a value. A user
//! override, when present, wins outright with its stored confidence.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::models::Category;

/// Keywords matched case-insensitively against app names and bundle ids.
static DISTRACTION_APPS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "instagram", "tiktok", "youtube", "twitter", "x.com", "reddit", "facebook", "snapchat",
        "twitch", "netflix", "hulu", "disney", "primevideo", "pinterest", "9gag", "tumblr",
        "threads", "bereal",
    ]
});

static WORK_APPS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "code", "xcode", "intellij", "pycharm", "webstorm", "terminal", "iterm", "vim", "emacs",
        "figma", "sketch", "notion", "obsidian", "linear", "jira", "confluence", "docs", "sheets",
        "slides", "excel", "word", "powerpoint", "keynote", "numbers", "pages", "github",
        "gitlab", "postman", "docker",
    ]
});

static COMM_APPS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "slack", "teams", "zoom", "meet", "mail", "gmail", "outlook", "messages", "whatsapp",
        "telegram", "signal", "discord",
    ]
});

static HEALTH_APPS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "strava", "fitness", "workout", "peloton", "myfitnesspal", "nike", "garmin", "whoop",
        "headspace", "calm", "oura",
    ]
});

static FINANCE_APPS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec!["bank", "chase", "venmo", "paypal", "robinhood", "mint", "wealthfront", "fidelity"]
});

/// Keyword rules for place labels and place categories, first match wins.
static PLACE_RULES: Lazy<Vec<(&'static [&'static str], Category)>> = Lazy::new(|| {
    vec![
        (&["coffee", "cafe", "restaurant", "diner", "bakery"][..], Category::Meal),
        (&["gym", "fitness", "yoga", "pool", "climbing", "studio"][..], Category::Health),
        (&["office", "school", "campus", "coworking", "work"][..], Category::Work),
        (&["church", "temple", "mosque", "synagogue"][..], Category::Routine),
        (&["home", "house", "apartment"][..], Category::Family),
        (&["bank", "credit union", "atm"][..], Category::Finance),
        (&["airport", "station", "terminal", "transit"][..], Category::Travel),
        (&["bar", "club", "pub", "lounge"][..], Category::Social),
        (&["park", "trail", "beach"][..], Category::Health),
        (&["store", "market", "grocery", "mall", "shop"][..], Category::Routine),
    ]
});

/// Classifier output for a single app key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub confidence: f64,
}

/// Per-user override for a specific app key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppOverride {
    pub category: Category,
    pub confidence: f64,
}

fn keyword_match(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| haystack.contains(kw))
}

/// Classify an app display name or package identifier.
pub fn classify_app(app_key: &str, overrides: &HashMap<String, AppOverride>) -> Classification {
    let title = display_title(app_key);

    if let Some(over) = overrides.get(app_key) {
        return Classification {
            description: format!("{title} (your category)"),
            title,
            category: over.category,
            confidence: over.confidence,
        };
    }

    let key = app_key.to_lowercase();
    let (category, confidence, note) = if keyword_match(&key, &DISTRACTION_APPS) {
        (Category::Social, 0.8, "Social / distraction")
    } else if keyword_match(&key, &WORK_APPS) {
        (Category::Work, 0.75, "Work & productivity")
    } else if keyword_match(&key, &COMM_APPS) {
        (Category::Comm, 0.7, "Communication")
    } else if keyword_match(&key, &HEALTH_APPS) {
        (Category::Health, 0.7, "Health & fitness")
    } else if keyword_match(&key, &FINANCE_APPS) {
        (Category::Finance, 0.7, "Finance")
    } else {
        (Category::Digital, 0.4, "Screen time")
    };

    Classification {
        description: format!("{note}: {title}"),
        title,
        category,
        confidence,
    }
}

/// Classify a place label plus optional place category into an activity
/// category. Unmatched places fall back to `Free`.
pub fn classify_place(label: &str, place_category: Option<&str>) -> (Category, f64) {
    let mut haystack = label.to_lowercase();
    if let Some(cat) = place_category {
        haystack.push(' ');
        haystack.push_str(&cat.to_lowercase());
    }

    for (keywords, category) in PLACE_RULES.iter() {
        if keyword_match(&haystack, keywords) {
            return (*category, 0.7);
        }
    }
    (Category::Free, 0.4)
}

/// True for apps whose usage counts as distraction time.
pub fn is_distracting_app(app_key: &str) -> bool {
    keyword_match(&app_key.to_lowercase(), &DISTRACTION_APPS)
}

/// True for apps whose usage counts as productive time.
pub fn is_productive_app(app_key: &str) -> bool {
    let key = app_key.to_lowercase();
    keyword_match(&key, &WORK_APPS)
}

/// True if the app is what you'd expect to see during this activity
/// category (a work app during a work block is not a distraction).
pub fn app_expected_for(app_key: &str, category: Category) -> bool {
    let key = app_key.to_lowercase();
    match category {
        Category::Work | Category::Meeting => {
            keyword_match(&key, &WORK_APPS) || keyword_match(&key, &COMM_APPS)
        }
        Category::Comm => keyword_match(&key, &COMM_APPS),
        Category::Health => keyword_match(&key, &HEALTH_APPS),
        Category::Finance => keyword_match(&key, &FINANCE_APPS),
        Category::Social => keyword_match(&key, &DISTRACTION_APPS),
        _ => false,
    }
}

/// Turn a package identifier like "com.example.SomeApp" into a title.
fn display_title(app_key: &str) -> String {
    let last = app_key.rsplit('.').next().unwrap_or(app_key);
    if last.is_empty() {
        app_key.to_string()
    } else {
        last.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_outright() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "com.burbn.instagram".to_string(),
            AppOverride {
                category: Category::Work,
                confidence: 0.95,
            },
        );
        let c = classify_app("com.burbn.instagram", &overrides);
        assert_eq!(c.category, Category::Work);
        assert_eq!(c.confidence, 0.95);
    }

    #[test]
    fn distraction_keywords_match_bundle_ids() {
        let c = classify_app("com.burbn.instagram", &HashMap::new());
        assert_eq!(c.category, Category::Social);
        assert!(c.confidence >= 0.7);
    }

    #[test]
    fn unmatched_app_defaults_to_digital_low_confidence() {
        let c = classify_app("com.example.obscure", &HashMap::new());
        assert_eq!(c.category, Category::Digital);
        assert!(c.confidence >= 0.3 && c.confidence <= 0.5);
    }

    #[test]
    fn place_keywords() {
        assert_eq!(classify_place("Blue Bottle Coffee", None).0, Category::Meal);
        assert_eq!(classify_place("Equinox Gym", None).0, Category::Health);
        assert_eq!(classify_place("HQ", Some("office")).0, Category::Work);
        assert_eq!(classify_place("Somewhere", None).0, Category::Free);
    }

    #[test]
    fn expected_apps_are_not_distractions_in_context() {
        assert!(app_expected_for("com.tinyspeck.slack", Category::Work));
        assert!(!app_expected_for("com.burbn.instagram", Category::Work));
    }
}
