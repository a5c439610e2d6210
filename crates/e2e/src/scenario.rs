//! Declarative YAML scenarios
//!
//! A scenario file describes one test class:
//!
//! ```yaml
//! name: login
//! tags: [smoke]
//! tests:
//!   - name: rejects-bad-password
//!     steps:
//!       - action: enter_text
//!         target: { css: "input[name=email]" }
//!         value: qa@example.com
//!       - action: click
//!         target: { id: submit }
//!       - action: assert_visible
//!         target: { css: ".error-banner" }
//! ```

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::driver::Locator;
use crate::error::{HarnessError, HarnessResult};
use crate::runner::{Skip, TestCase, TestClass, TestContext};

/// One scenario file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Class name
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    pub tests: Vec<ScenarioTest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTest {
    pub name: String,

    /// Continue from the previous test's page instead of the base URL
    #[serde(default)]
    pub retain_session: bool,

    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Absolute URL, or a path relative to the base URL
    Navigate { url: String },

    Click { target: Locator },

    EnterText { target: Locator, value: String },

    WaitVisible { target: Locator },

    WaitSettled,

    ScrollTo { target: Locator },

    AssertVisible { target: Locator },

    AssertUrlContains { fragment: String },

    Screenshot { name: String },

    Log { message: String },

    Skip {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Join `url` onto `base` unless it is already absolute.
pub fn resolve_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }
}

impl ScenarioStep {
    /// Narration line for the report
    pub fn describe(&self) -> String {
        match self {
            ScenarioStep::Navigate { url } => format!("Navigate to {}", url),
            ScenarioStep::Click { target } => format!("Click {}", target),
            ScenarioStep::EnterText { target, .. } => format!("Enter text into {}", target),
            ScenarioStep::WaitVisible { target } => format!("Wait for {}", target),
            ScenarioStep::WaitSettled => "Wait for page to settle".to_string(),
            ScenarioStep::ScrollTo { target } => format!("Scroll to {}", target),
            ScenarioStep::AssertVisible { target } => format!("Verify {} is visible", target),
            ScenarioStep::AssertUrlContains { fragment } => {
                format!("Verify URL contains '{}'", fragment)
            }
            ScenarioStep::Screenshot { name } => format!("Screenshot {}", name),
            ScenarioStep::Log { message } => message.clone(),
            ScenarioStep::Skip { .. } => "Skip".to_string(),
        }
    }

    pub async fn execute(&self, ctx: &TestContext) -> anyhow::Result<()> {
        let ui = ctx.ui();
        match self {
            ScenarioStep::Navigate { url } => {
                ui.navigate(&resolve_url(ctx.base_url(), url)).await?;
            }
            ScenarioStep::Click { target } => ui.click(target).await?,
            ScenarioStep::EnterText { target, value } => ui.enter_text(target, value).await?,
            ScenarioStep::WaitVisible { target } => ui.wait_until_visible(target).await?,
            ScenarioStep::WaitSettled => ui.wait_for_page_settled().await?,
            ScenarioStep::ScrollTo { target } => ui.scroll_into_view(target).await?,
            ScenarioStep::AssertVisible { target } => {
                if !ui.is_displayed(target).await? {
                    bail!("expected {} to be visible", target);
                }
            }
            ScenarioStep::AssertUrlContains { fragment } => {
                let url = ui.current_url().await?;
                if !url.contains(fragment.as_str()) {
                    bail!("expected URL to contain '{}', was '{}'", fragment, url);
                }
            }
            ScenarioStep::Screenshot { name } => {
                if let Some(path) = ctx.screenshot(name).await {
                    ctx.info(&format!("Screenshot saved to {}", path.display()));
                }
            }
            ScenarioStep::Log { .. } => {}
            ScenarioStep::Skip { reason } => return Err(Skip(reason.clone()).into()),
        }
        Ok(())
    }
}

impl ScenarioTest {
    fn into_case(self) -> TestCase {
        let retain = self.retain_session;
        let steps = std::sync::Arc::new(self.steps);
        let case = TestCase::new(self.name, move |ctx: TestContext| {
            let steps = std::sync::Arc::clone(&steps);
            async move {
                for (i, step) in steps.iter().enumerate() {
                    match step {
                        ScenarioStep::Log { message } => ctx.info(message),
                        _ => ctx.step(&step.describe()),
                    }
                    step.execute(&ctx)
                        .await
                        .with_context(|| format!("step {} ({})", i + 1, step.describe()))?;
                }
                ctx.pass_note("All steps completed");
                Ok(())
            }
        });
        if retain {
            case.retain_session()
        } else {
            case
        }
    }
}

impl Scenario {
    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        if scenario.tests.is_empty() {
            return Err(HarnessError::Scenario(format!(
                "scenario '{}' has no tests",
                scenario.name
            )));
        }
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| HarnessError::Scenario(format!("{}: {}", path.display(), e)))
    }

    /// Load every `.yaml`/`.yml` file under `dir`, sorted by path
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        paths.iter().map(|p| Self::from_file(p)).collect()
    }

    /// Keep scenarios carrying `tag`
    pub fn filter_by_tag(scenarios: Vec<Self>, tag: &str) -> Vec<Self> {
        scenarios
            .into_iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// Keep only tests named `name`, dropping scenarios left empty
    pub fn filter_by_test_name(scenarios: Vec<Self>, name: &str) -> Vec<Self> {
        scenarios
            .into_iter()
            .filter_map(|mut s| {
                s.tests.retain(|t| t.name == name);
                (!s.tests.is_empty()).then_some(s)
            })
            .collect()
    }

    pub fn into_class(self) -> TestClass {
        self.tests
            .into_iter()
            .fold(TestClass::new(self.name), |class, test| {
                class.test(test.into_case())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN: &str = r#"
name: login
description: Login surface
tags:
  - smoke
tests:
  - name: shows-form
    steps:
      - action: wait_visible
        target: { css: "form#login" }
      - action: screenshot
        name: login-form
  - name: continues-to-dashboard
    retain_session: true
    steps:
      - action: enter_text
        target: { name: email }
        value: qa@example.com
      - action: click
        target: { id: submit }
      - action: wait_settled
      - action: assert_url_contains
        fragment: dashboard
"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_yaml(LOGIN).unwrap();
        assert_eq!(scenario.name, "login");
        assert_eq!(scenario.tests.len(), 2);
        assert!(scenario.tests[1].retain_session);
        assert_eq!(
            scenario.tests[1].steps[1],
            ScenarioStep::Click {
                target: Locator::id("submit")
            }
        );
        assert_eq!(scenario.tests[1].steps[2], ScenarioStep::WaitSettled);
    }

    #[test]
    fn test_empty_scenario_rejected() {
        assert!(matches!(
            Scenario::from_yaml("name: empty\ntests: []\n"),
            Err(HarnessError::Scenario(_))
        ));
    }

    #[test]
    fn test_filters() {
        let scenarios = vec![Scenario::from_yaml(LOGIN).unwrap()];
        assert_eq!(Scenario::filter_by_tag(scenarios.clone(), "smoke").len(), 1);
        assert!(Scenario::filter_by_tag(scenarios.clone(), "nightly").is_empty());

        let named = Scenario::filter_by_test_name(scenarios.clone(), "shows-form");
        assert_eq!(named[0].tests.len(), 1);
        assert!(Scenario::filter_by_test_name(scenarios, "nope").is_empty());
    }

    #[test]
    fn test_into_class_keeps_retain_flag() {
        let class = Scenario::from_yaml(LOGIN).unwrap().into_class();
        assert_eq!(class.name, "login");
        assert!(!class.tests[0].retain_session);
        assert!(class.tests[1].retain_session);
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url("https://a.test/", "/login"), "https://a.test/login");
        assert_eq!(resolve_url("https://a.test", "login"), "https://a.test/login");
        assert_eq!(resolve_url("https://a.test/", "http://b.test/x"), "http://b.test/x");
    }

    #[test]
    fn test_load_all_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let zeta = LOGIN.replace("name: login", "name: zeta");
        std::fs::write(dir.path().join("b.yaml"), zeta).unwrap();
        std::fs::write(dir.path().join("a.yml"), LOGIN).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let scenarios = Scenario::load_all(dir.path()).unwrap();
        let names: Vec<_> = scenarios.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["login", "zeta"]);
    }
}
