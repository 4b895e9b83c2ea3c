use async_trait::async_trait;
use retrace_engine::driver::{Driver, DriverError, NavigationWait};
use retrace_engine::protocol::{Action, PageContext, Session};
use retrace_engine::replay::{
    GotoPolicy, ReplayEngine, ReplayError, ReplayOptions, StepStatus, choose_start_url,
};
use retrace_engine::template::Variables;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Scriptable driver that records the calls it receives.
#[derive(Default)]
struct MockDriver {
    present: HashSet<String>,
    navigates_to: HashMap<String, String>,
    fill_errors: HashMap<String, DriverError>,
    click_errors: HashMap<String, DriverError>,
    calls: Mutex<Vec<String>>,
    navigation: Notify,
    pending_url: Mutex<Option<String>>,
    captures: bool,
}

impl MockDriver {
    fn with_elements(selectors: &[&str]) -> Self {
        Self {
            present: selectors.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn log(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn launch(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        self.log(format!("wait {}", selector));
        if self.present.contains(selector) {
            Ok(())
        } else {
            tokio::time::sleep(timeout).await;
            Err(DriverError::timeout(format!("wait_for_selector {}", selector)))
        }
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        self.log(format!("fill {} {}", selector, value));
        match self.fill_errors.get(selector) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        self.log(format!("click {}", selector));
        if let Some(e) = self.click_errors.get(selector) {
            return Err(e.clone());
        }
        if let Some(url) = self.navigates_to.get(selector) {
            *self.pending_url.lock().unwrap() = Some(url.clone());
            self.navigation.notify_one();
        }
        Ok(())
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<NavigationWait, DriverError> {
        match tokio::time::timeout(timeout, self.navigation.notified()).await {
            Ok(()) => {
                let url = self.pending_url.lock().unwrap().take().unwrap_or_default();
                Ok(NavigationWait::Navigated { url })
            }
            Err(_) => Ok(NavigationWait::TimedOut),
        }
    }

    async fn goto(&self, url: &str) -> Result<(), DriverError> {
        self.log(format!("goto {}", url));
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        if !self.captures {
            return Err(DriverError::NotSupported("screenshot".into()));
        }
        self.log("screenshot".into());
        Ok(b"\x89PNG".to_vec())
    }
}

fn engine() -> ReplayEngine {
    ReplayEngine::new(ReplayOptions::default())
}

#[tokio::test(start_paused = true)]
async fn test_fill_then_click_without_navigation() {
    let driver = MockDriver::with_elements(&["#name", "#submit"]);
    let session = Session::from(vec![
        Action::fill("#name", "Alice", 1),
        Action::click("#submit", 2),
    ]);

    let report = engine().run(&driver, &session).await.unwrap();

    assert_eq!(
        driver.calls(),
        vec!["wait #name", "fill #name Alice", "wait #submit", "click #submit"]
    );
    assert_eq!(report.steps[0].status, StepStatus::Performed);
    assert_eq!(report.steps[1].status, StepStatus::Performed);
    assert!(report.is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_missing_element_is_skipped_and_replay_continues() {
    let driver = MockDriver::with_elements(&["#a", "#c"]);
    let session = Session::from(vec![
        Action::click("#a", 1),
        Action::fill("#missing", "x", 2),
        Action::click("#c", 3),
    ]);

    let report = engine().run(&driver, &session).await.unwrap();

    assert_eq!(report.steps.len(), 3);
    assert_eq!(report.steps[1].status, StepStatus::Skipped);
    assert!(report.steps[1].note.as_deref().unwrap().contains("#missing"));
    assert_eq!(report.steps[2].status, StepStatus::Performed);
    assert!(driver.calls().contains(&"click #c".to_string()));
    assert!(!driver.calls().iter().any(|c| c.starts_with("fill #missing")));
    assert_eq!(report.skipped(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_click_that_navigates_is_awaited() {
    let mut driver = MockDriver::with_elements(&["#next"]);
    driver
        .navigates_to
        .insert("#next".into(), "https://shop.test/step2".into());
    let session = Session::from(vec![Action::click("#next", 1)]);

    let started = tokio::time::Instant::now();
    let report = engine().run(&driver, &session).await.unwrap();

    assert_eq!(report.steps[0].status, StepStatus::Navigated);
    assert_eq!(report.steps[0].note.as_deref(), Some("https://shop.test/step2"));
    // Navigation resolved well before the bound: only pacing elapsed.
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_fatal_driver_error_aborts_with_index() {
    let mut driver = MockDriver::with_elements(&["#a", "#b", "#c"]);
    driver.click_errors.insert("#b".into(), DriverError::ConnectionLost);
    let session = Session::from(vec![
        Action::click("#a", 1),
        Action::click("#b", 2),
        Action::click("#c", 3),
    ]);

    let err = engine().run(&driver, &session).await.unwrap_err();
    match err {
        ReplayError::DriverFatal {
            index,
            action,
            source,
        } => {
            assert_eq!(index, 1);
            assert_eq!(action.selector(), Some("#b"));
            assert_eq!(source, DriverError::ConnectionLost);
        }
        other => panic!("Expected DriverFatal, got {:?}", other),
    }
    assert!(!driver.calls().contains(&"click #c".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_element_level_error_marks_step_failed() {
    let mut driver = MockDriver::with_elements(&["#ro", "#ok"]);
    driver.fill_errors.insert(
        "#ro".into(),
        DriverError::ElementNotInteractable {
            selector: "#ro".into(),
            reason: "readonly".into(),
        },
    );
    let session = Session::from(vec![Action::fill("#ro", "v", 1), Action::click("#ok", 2)]);

    let report = engine().run(&driver, &session).await.unwrap();
    assert_eq!(report.steps[0].status, StepStatus::Failed);
    assert_eq!(report.steps[1].status, StepStatus::Performed);
    assert_eq!(report.failed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_goto_policies() {
    let session = Session::from(vec![
        Action::goto("https://a.test/", 1),
        Action::goto("https://a.test/next", 2),
    ]);

    let driver = MockDriver::default();
    let report = engine().run(&driver, &session).await.unwrap();
    // Start URL opens the first page; the gotos themselves are markers.
    assert_eq!(driver.calls(), vec!["goto https://a.test/"]);
    assert_eq!(report.start_url.as_deref(), Some("https://a.test/"));
    assert!(report.steps.iter().all(|s| s.status == StepStatus::Marker));

    let driver = MockDriver::default();
    let navigate = ReplayEngine::new(ReplayOptions {
        goto_policy: GotoPolicy::Navigate,
        start_url: Some("https://home.test/".into()),
        ..Default::default()
    });
    navigate.run(&driver, &session).await.unwrap();
    assert_eq!(
        driver.calls(),
        vec![
            "goto https://home.test/",
            "goto https://a.test/",
            "goto https://a.test/next"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_pacing_between_actions() {
    let driver = MockDriver::with_elements(&["#a"]);
    let session = Session::from(vec![Action::fill("#a", "1", 1), Action::fill("#a", "2", 2)]);

    let started = tokio::time::Instant::now();
    engine().run(&driver, &session).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn test_templates_are_rendered() {
    let driver = MockDriver::with_elements(&["#user"]);
    let session = Session::from(vec![
        Action::goto("https://{{host}}/login", 1),
        Action::fill("#user", "{{ username }}", 2),
        Action::fill("#user", "{{unknown}}", 3),
    ]);
    let mut vars = Variables::new();
    vars.insert("host".into(), "shop.test".into());
    vars.insert("username".into(), "bob".into());

    let report = engine().with_variables(vars).run(&driver, &session).await.unwrap();
    assert_eq!(report.start_url.as_deref(), Some("https://shop.test/login"));
    let calls = driver.calls();
    assert!(calls.contains(&"fill #user bob".to_string()));
    assert!(calls.contains(&"fill #user {{unknown}}".to_string()));
}

#[test]
fn test_choose_start_url() {
    let recorded_on = |url: &str| PageContext {
        page_url: Some(url.into()),
        page_title: None,
    };

    // A leading click starts where it was recorded.
    let session = Session::from(vec![
        Action::click("#y", 1).with_context(recorded_on("http://127.0.0.1:5000/")),
        Action::goto("https://later.test/", 2),
    ]);
    assert_eq!(
        choose_start_url(&session).as_deref(),
        Some("http://127.0.0.1:5000/")
    );

    // A leading goto contributes its target.
    let session = Session::from(vec![
        Action::goto("https://shop.test/", 1).with_context(recorded_on("https://home.test/")),
        Action::click("#buy", 2),
    ]);
    assert_eq!(choose_start_url(&session).as_deref(), Some("https://shop.test/"));

    // Non-web first actions fall back to their page, then give up.
    let session = Session::from(vec![
        Action::goto("about:blank", 1).with_context(recorded_on("https://home.test/")),
    ]);
    assert_eq!(choose_start_url(&session).as_deref(), Some("https://home.test/"));
    let session = Session::from(vec![
        Action::click("#x", 1).with_context(recorded_on("chrome-extension://abc/popup.html")),
        Action::click("#y", 2).with_context(recorded_on("http://127.0.0.1:5000/")),
    ]);
    assert_eq!(choose_start_url(&session), None);
    assert_eq!(choose_start_url(&Session::new()), None);
}

#[tokio::test(start_paused = true)]
async fn test_later_goto_is_not_opened_first() {
    let driver = MockDriver::with_elements(&["#name", "#submit"]);
    let session = Session::from(vec![
        Action::fill("#name", "Alice", 1),
        Action::click("#submit", 2),
        Action::goto("https://shop.test/thanks", 3),
    ]);

    let report = engine().run(&driver, &session).await.unwrap();
    assert_eq!(report.start_url, None);
    assert_eq!(
        driver.calls(),
        vec!["wait #name", "fill #name Alice", "wait #submit", "click #submit"]
    );
    assert_eq!(report.steps[0].status, StepStatus::Performed);
    assert_eq!(report.steps[2].status, StepStatus::Marker);
}

fn quick_options() -> ReplayOptions {
    ReplayOptions {
        wait_timeout: Duration::from_millis(20),
        navigation_timeout: Duration::from_millis(20),
        pacing: Duration::ZERO,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_skipped_and_failed_steps_are_captured() {
    let shots = tempfile::tempdir().unwrap();
    let dir = shots.path().join("run-1");
    let mut driver = MockDriver::with_elements(&["#name", "#submit"]);
    driver.captures = true;
    driver.fill_errors.insert(
        "#name".into(),
        DriverError::ElementNotInteractable {
            selector: "#name".into(),
            reason: "disabled".into(),
        },
    );
    let session = Session::from(vec![
        Action::fill("#name", "Alice", 1),
        Action::click("#gone", 2),
        Action::click("#submit", 3),
    ]);

    let report = ReplayEngine::new(quick_options())
        .with_screenshot_dir(&dir)
        .run(&driver, &session)
        .await
        .unwrap();

    let failed = dir.join("step-000-failed.png");
    let skipped = dir.join("step-001-skipped.png");
    assert_eq!(report.steps[0].status, StepStatus::Failed);
    assert_eq!(report.steps[0].screenshot, Some(failed.display().to_string()));
    assert_eq!(report.steps[1].status, StepStatus::Skipped);
    assert_eq!(report.steps[1].screenshot, Some(skipped.display().to_string()));
    assert_eq!(report.steps[2].status, StepStatus::Performed);
    assert_eq!(report.steps[2].screenshot, None);

    assert_eq!(std::fs::read(&failed).unwrap(), b"\x89PNG");
    assert!(skipped.is_file());
    let captured = driver.calls().iter().filter(|c| *c == "screenshot").count();
    assert_eq!(captured, 2);
}

#[tokio::test]
async fn test_capture_is_optional_for_drivers() {
    let shots = tempfile::tempdir().unwrap();
    let dir = shots.path().join("unused");
    let driver = MockDriver::with_elements(&[]);
    let session = Session::from(vec![Action::click("#gone", 1)]);

    let report = ReplayEngine::new(quick_options())
        .with_screenshot_dir(&dir)
        .run(&driver, &session)
        .await
        .unwrap();

    assert_eq!(report.steps[0].status, StepStatus::Skipped);
    assert_eq!(report.steps[0].screenshot, None);
    assert!(!dir.exists());
}
