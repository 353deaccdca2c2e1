//! Cancellation scenarios against a scripted history lookup.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use railbot_core::{
    cancel::{run_batch, CancelConfig, CancelMode, CancelOutcome, CancelPipeline, CancellationTarget, ItemResult},
    pipeline::PipelineError,
    retry::PatternConfig,
    run::{RunContext, RunStatus},
    site::SiteConfig,
    stage::Stage,
    recognizer::{ChallengeSolver, PrimaryEngine},
    testing::{fixtures, pages, MockCodeRecognizer, MockConnector, MockReply},
};

const CANCEL: &str = "HistoryDetailsForm";
const LOOKUP: &str = "HistoryForm";
const ENTRY: &str = "bookmarkablePage";

struct Site {
    connector: Arc<MockConnector>,
    site: SiteConfig,
}

impl Site {
    fn new(lookup: Vec<MockReply>, cancel: MockReply) -> Self {
        let site = SiteConfig::default();
        let connector = Arc::new(MockConnector::new());
        connector.route(CANCEL, cancel);
        connector.route_sequence(LOOKUP, lookup);
        connector.route("captcha-", MockReply::bytes(pages::CAPTCHA_IMAGE));
        connector.route(
            ENTRY,
            MockReply::page(&site.history_url(), pages::history_page("/IMINT/captcha-h.png")),
        );
        Self { connector, site }
    }

    fn pipeline(&self) -> CancelPipeline {
        self.pipeline_with(fixtures::agreeing_solver("CD34"))
    }

    fn pipeline_with(&self, solver: ChallengeSolver) -> CancelPipeline {
        CancelPipeline::new(
            self.connector.clone(),
            solver,
            self.site.clone(),
            fixtures::fast_retry_config(),
            &PatternConfig::default(),
        )
        .unwrap()
    }
}

fn details(pnr: &str) -> MockReply {
    MockReply::page(
        &SiteConfig::default().interface_url(1),
        pages::booking_details_page(pnr),
    )
}

fn lookup_error(message: &str) -> MockReply {
    MockReply::page(&SiteConfig::default().history_url(), pages::error_page(message))
}

fn result_page(body: String) -> MockReply {
    MockReply::page(&SiteConfig::default().interface_url(2), body)
}

fn target(pnr: &str) -> CancellationTarget {
    CancellationTarget::new("A123456789", pnr)
}

#[tokio::test(start_paused = true)]
async fn test_cancel_success() {
    let site = Site::new(
        vec![details("12345678")],
        result_page(pages::cancel_success_page()),
    );

    let run = RunContext::new("thsrc-cancel");
    let outcome = site
        .pipeline()
        .run(&target("12345678"), &run, &CancellationToken::new())
        .await
        .unwrap();

    match outcome {
        CancelOutcome::Cancelled { pnr, summary } => {
            assert_eq!(pnr, "12345678");
            assert_eq!(summary.reservation_code, "12345678");
            assert_eq!(summary.train_no, "0803");
        }
        other => panic!("expected a cancellation, got {:?}", other),
    }

    let lookup = site.connector.requests_to(LOOKUP);
    assert_eq!(lookup.len(), 1);
    assert_eq!(lookup[0].form_value("typesofid"), Some("0"));
    assert_eq!(lookup[0].form_value("rocId"), Some("A123456789"));
    assert_eq!(lookup[0].form_value("orderId"), Some("12345678"));
    assert_eq!(lookup[0].form_value("divCaptcha:securityCode"), Some("CD34"));

    let cancel = site.connector.requests_to(CANCEL);
    assert_eq!(cancel.len(), 1);
    assert_eq!(cancel[0].form_value("SubmitButton"), Some("取消訂位"));
    assert_eq!(
        cancel[0].header("Referer"),
        Some(site.site.lookup_submit_url(Some("MOCKSESSION1")).as_str())
    );
    assert_eq!(run.retries(Stage::Lookup), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lookup_not_found_is_fatal_without_retries() {
    let site = Site::new(
        vec![lookup_error("查無此筆訂位紀錄，請確認後重新輸入")],
        result_page(pages::cancel_success_page()),
    );

    let run = RunContext::new("thsrc-cancel");
    let result = site
        .pipeline()
        .run(&target("12345678"), &run, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(PipelineError::LookupNotFound(_))));
    assert_eq!(run.retries(Stage::Lookup), 0);
    assert_eq!(site.connector.requests_to(LOOKUP).len(), 1);
    assert!(site.connector.requests_to(CANCEL).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_lookup_challenge_miss_then_hit() {
    let site = Site::new(
        vec![
            lookup_error("驗證碼輸入錯誤"),
            details("12345678"),
        ],
        result_page(pages::cancel_success_page()),
    );

    let run = RunContext::new("thsrc-cancel");
    let outcome = site
        .pipeline()
        .run(&target("12345678"), &run, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, CancelOutcome::Cancelled { .. }));
    assert_eq!(run.retries(Stage::Lookup), 1);
    // the challenge is refreshed by reloading the history page
    assert_eq!(site.connector.requests_to(ENTRY).len(), 2);
    assert_eq!(site.connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_cancellation_is_indeterminate() {
    let site = Site::new(
        vec![details("12345678")],
        result_page(pages::cancel_unclear_page()),
    );

    let run = RunContext::new("thsrc-cancel");
    let outcome = site
        .pipeline()
        .run(&target("12345678"), &run, &CancellationToken::new())
        .await
        .unwrap();

    match outcome {
        CancelOutcome::Indeterminate { excerpt, .. } => {
            assert!(excerpt.contains("系統處理中"));
            assert!(excerpt.chars().count() <= 200);
        }
        other => panic!("expected an indeterminate result, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_refused_cancellation_is_rejected() {
    let site = Site::new(
        vec![details("12345678")],
        result_page(pages::error_page("已取票之訂位無法取消")),
    );

    let run = RunContext::new("thsrc-cancel");
    let result = site
        .pipeline()
        .run(&target("12345678"), &run, &CancellationToken::new())
        .await;

    match result {
        Err(PipelineError::Rejected { stage, message }) => {
            assert_eq!(stage, Stage::Cancel);
            assert!(message.contains("無法取消"));
        }
        other => panic!("expected a rejection, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_continues_after_failure() {
    let site = Site::new(
        vec![
            details("11111111"),
            lookup_error("查無此筆訂位紀錄"),
        ],
        result_page(pages::cancel_success_page()),
    );
    let config = CancelConfig {
        delay_between_secs: 5,
        ..Default::default()
    };
    let targets = vec![target("11111111"), target("22222222")];

    let run = RunContext::new("thsrc-cancel");
    let started = tokio::time::Instant::now();
    let report = run_batch(
        &site.pipeline(),
        &targets,
        &config,
        &run,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(report.items.len(), 2);
    assert_eq!(report.items[0].result, ItemResult::Cancelled);
    assert!(matches!(
        &report.items[1].result,
        ItemResult::Failed { kind, .. } if kind == "lookup_not_found"
    ));
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.status(), RunStatus::Failed);
    assert!(started.elapsed() >= Duration::from_secs(5));

    let snapshot = run.snapshot();
    assert_eq!(snapshot.status, RunStatus::Failed);
    assert_eq!(snapshot.summary.as_deref(), Some("1 cancelled, 0 unconfirmed, 1 failed"));
    assert_eq!(site.connector.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_batch_single_mode_takes_first_target() {
    let site = Site::new(
        vec![details("11111111")],
        result_page(pages::cancel_success_page()),
    );
    let config = CancelConfig {
        mode: CancelMode::Single,
        ..Default::default()
    };
    let targets = vec![target("11111111"), target("22222222")];

    let run = RunContext::new("thsrc-cancel");
    let report = run_batch(&site.pipeline(), &targets, &config, &run, &CancellationToken::new()).await;

    assert_eq!(report.items.len(), 1);
    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(site.connector.requests_to(LOOKUP).len(), 1);
}

/// Only engine never produces a code.
fn unreadable_solver() -> (ChallengeSolver, Arc<MockCodeRecognizer>) {
    let engine = Arc::new(MockCodeRecognizer::new());
    let solver = ChallengeSolver::new(PrimaryEngine::Specialized).with_specialized(engine.clone());
    (solver, engine)
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_challenges_exhaust_lookup() {
    let site = Site::new(
        vec![details("12345678")],
        result_page(pages::cancel_success_page()),
    );
    let (solver, engine) = unreadable_solver();

    let run = RunContext::new("thsrc-cancel");
    let result = site
        .pipeline_with(solver)
        .run(&target("12345678"), &run, &CancellationToken::new())
        .await;

    match result {
        Err(PipelineError::StageExhausted { stage, retries, .. }) => {
            assert_eq!(stage, Stage::Lookup);
            assert_eq!(retries, 10);
        }
        other => panic!("expected an exhausted lookup, got {:?}", other),
    }
    // five unreadable challenges per session, ten for the reservation
    assert_eq!(site.connector.connect_count(), 2);
    assert_eq!(engine.call_count(), 10);
    assert_eq!(run.snapshot().recognition_failures, 10);
    assert!(site.connector.requests_to(LOOKUP).is_empty());
    assert!(site.connector.requests_to(CANCEL).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_lookup_budget_survives_restarts() {
    let site = Site::new(
        vec![
            lookup_error("驗證碼輸入錯誤"),
            lookup_error("驗證碼輸入錯誤"),
            lookup_error("驗證碼輸入錯誤"),
            details("12345678"),
        ],
        result_page(pages::cancel_success_page()),
    );
    // one bad read per session restarts it; three rejections spend the rest
    let mut retry = fixtures::fast_retry_config();
    retry.lookup_max_retries = 4;
    retry.recognition_failures_before_restart = 1;
    let engine = Arc::new(MockCodeRecognizer::new());
    engine.push(Ok(None));
    engine.push(Ok(None));
    engine.push(Ok(Some("CD34".into())));
    let solver = ChallengeSolver::new(PrimaryEngine::Specialized).with_specialized(engine);
    let pipeline = CancelPipeline::new(
        site.connector.clone(),
        solver,
        site.site.clone(),
        retry,
        &PatternConfig::default(),
    )
    .unwrap();

    let run = RunContext::new("thsrc-cancel");
    let result = pipeline
        .run(&target("12345678"), &run, &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::StageExhausted { stage: Stage::Lookup, retries: 4, .. })
    ));
    assert_eq!(site.connector.connect_count(), 3);
    assert_eq!(site.connector.requests_to(LOOKUP).len(), 2);
    assert!(site.connector.requests_to(CANCEL).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_batch_moves_past_unreadable_challenges() {
    let site = Site::new(
        vec![details("11111111")],
        result_page(pages::cancel_success_page()),
    );
    let (solver, _) = unreadable_solver();
    let targets = vec![target("11111111"), target("22222222")];

    let run = RunContext::new("thsrc-cancel");
    let report = run_batch(
        &site.pipeline_with(solver),
        &targets,
        &CancelConfig::default(),
        &run,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(report.items.len(), 2);
    for item in &report.items {
        assert!(matches!(
            &item.result,
            ItemResult::Failed { kind, .. } if kind == "stage_exhausted"
        ));
    }
    assert_eq!(report.status(), RunStatus::Failed);
    assert!(!report.interrupted);
    assert_eq!(site.connector.connect_count(), 4);
}
