//! Booking pipeline scenarios against a scripted site.
//!
//! Each test wires a `MockConnector` with canned pages for the entry page,
//! the challenge image and the three stage submissions, then checks the
//! outcome and the run's counters.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use railbot_core::{
    booking::{BookingOutcome, BookingPipeline, SelectionMode, TripSelection},
    pipeline::{PipelineError, PipelineState},
    recognizer::{ChallengeSolver, PrimaryEngine},
    retry::{PatternConfig, RetryConfig},
    run::{RunContext, RunStatus},
    site::SiteConfig,
    stage::Stage,
    testing::{fixtures, pages, MockCodeRecognizer, MockConnector, MockReply},
    transport::TransportError,
};

const QUERY: &str = "BookingS1Form::";
const SELECT: &str = "BookingS2Form::";
const CONFIRM: &str = "BookingS3Form::";

struct Site {
    connector: Arc<MockConnector>,
    site: SiteConfig,
}

impl Site {
    /// Entry page, challenge image and refresh link are always served.
    fn new() -> Self {
        let site = SiteConfig::default();
        let connector = Arc::new(MockConnector::new());
        connector.route(
            "reCodeLink",
            MockReply::page(
                &site.root_url(),
                pages::captcha_refresh_fragment("/IMINT/captcha-2.png"),
            ),
        );
        connector.route("captcha-", MockReply::bytes(pages::CAPTCHA_IMAGE));
        connector.route(
            "?locale=tw",
            MockReply::page(
                &site.reservation_url(),
                pages::reservation_page("/IMINT/captcha-1.png"),
            ),
        );
        Self { connector, site }
    }

    fn train_list(&self) -> MockReply {
        MockReply::page(
            &self.site.interface_url(1),
            pages::train_list_page(&[
                pages::TrainRow::new("0803", "08:06", "09:36", Some("早鳥9折")),
                pages::TrainRow::new("0615", "08:21", "10:11", None),
            ]),
        )
    }

    /// The search form again, with an error banner.
    fn query_error(&self, message: &str) -> MockReply {
        MockReply::page(&self.site.reservation_url(), pages::error_page(message))
    }

    fn serve_select_and_confirm(&self) {
        self.connector.route(
            SELECT,
            MockReply::page(&self.site.interface_url(2), pages::confirm_ticket_page(1)),
        );
        self.connector.route(
            CONFIRM,
            MockReply::page(
                &self.site.interface_url(3),
                pages::booking_result_page("01234567", "0803", &["5車7A"]),
            ),
        );
    }

    fn pipeline(&self, trip: TripSelection, mode: SelectionMode) -> BookingPipeline {
        self.pipeline_with(trip, mode, fixtures::agreeing_solver("AB12"), fixtures::fast_retry_config())
            .unwrap()
    }

    fn pipeline_with(
        &self,
        trip: TripSelection,
        mode: SelectionMode,
        solver: ChallengeSolver,
        retry: RetryConfig,
    ) -> Result<BookingPipeline, PipelineError> {
        BookingPipeline::new(
            self.connector.clone(),
            solver,
            self.site.clone(),
            retry,
            &PatternConfig::default(),
            trip,
            mode,
        )
    }
}

async fn run(pipeline: &BookingPipeline) -> (Result<BookingOutcome, PipelineError>, RunContext) {
    let run = RunContext::new("thsrc");
    let result = pipeline.run(&run, &CancellationToken::new()).await;
    (result, run)
}

fn booked(result: Result<BookingOutcome, PipelineError>) -> railbot_core::Receipt {
    match result {
        Ok(BookingOutcome::Booked(receipt)) => receipt,
        other => panic!("expected a booking, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_happy_path_books_discounted_train() {
    let site = Site::new();
    site.connector.route(QUERY, site.train_list());
    site.serve_select_and_confirm();

    let pipeline = site.pipeline(fixtures::trip_selection(), SelectionMode::Auto);
    let (result, run) = run(&pipeline).await;

    let receipt = booked(result);
    assert_eq!(receipt.reservation_code, "01234567");
    assert_eq!(receipt.train_no, "0803");
    assert_eq!(receipt.seats, vec!["5車7A"]);

    // 0803 carries the discount
    let select = site.connector.requests_to(SELECT);
    assert_eq!(select.len(), 1);
    assert_eq!(
        select[0].form_value("TrainQueryDataViewPanel:TrainGroup"),
        Some("radio1")
    );

    let query = site.connector.requests_to(QUERY);
    assert_eq!(query.len(), 1);
    assert_eq!(query[0].form_value("homeCaptcha:securityCode"), Some("AB12"));
    assert!(query[0].url.contains(";jsessionid=MOCKSESSION1"));

    let snapshot = run.snapshot();
    assert_eq!(snapshot.status, RunStatus::Succeeded);
    assert_eq!(snapshot.state, PipelineState::Success);
    assert_eq!(snapshot.search_attempts, 1);
    assert_eq!(snapshot.sessions_opened, 1);
    assert_eq!(run.retries(Stage::Query), 0);
    assert_eq!(site.connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_challenge_miss_then_hit() {
    let site = Site::new();
    site.connector.route_sequence(
        QUERY,
        vec![site.query_error("檢測碼輸入錯誤，請確認後重新輸入"), site.train_list()],
    );
    site.serve_select_and_confirm();

    let pipeline = site.pipeline(fixtures::trip_selection(), SelectionMode::Auto);
    let (result, run) = run(&pipeline).await;

    booked(result);
    assert_eq!(run.retries(Stage::Query), 1);
    assert_eq!(run.snapshot().stage_retries.get(&Stage::Query), Some(&1));
    assert_eq!(site.connector.requests_to(QUERY).len(), 2);
    assert_eq!(site.connector.requests_to("reCodeLink").len(), 1);
    // the miss stays in the same session
    assert_eq!(site.connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sold_out_starts_new_search_after_cooldown() {
    let site = Site::new();
    site.connector.route_sequence(
        QUERY,
        vec![site.query_error("去程查無可售車次或選擇的車次已售完"), site.train_list()],
    );
    site.serve_select_and_confirm();

    let pipeline = site.pipeline(fixtures::trip_selection(), SelectionMode::Auto);
    let started = tokio::time::Instant::now();
    let (result, run) = run(&pipeline).await;

    booked(result);
    let snapshot = run.snapshot();
    assert_eq!(snapshot.search_attempts, 2);
    assert_eq!(snapshot.sessions_opened, 2);
    assert_eq!(run.retries(Stage::Query), 0);
    assert_eq!(site.connector.connect_count(), 2);
    assert!(started.elapsed() >= fixtures::fast_retry_config().sold_out_cooldown());
    assert!(snapshot
        .events
        .iter()
        .any(|event| event.state == PipelineState::Cooldown));
}

#[tokio::test(start_paused = true)]
async fn test_too_many_tickets_is_config_error() {
    let site = Site::new();
    let mut trip = fixtures::trip_selection();
    trip.tickets.adult = 6;
    trip.tickets.elder = 5;

    let result = site.pipeline_with(
        trip,
        SelectionMode::Auto,
        fixtures::agreeing_solver("AB12"),
        fixtures::fast_retry_config(),
    );

    assert!(matches!(result, Err(PipelineError::Config(_))));
    assert_eq!(site.connector.connect_count(), 0);
    assert!(site.connector.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_date_out_of_range_is_fatal() {
    let site = Site::new();
    site.connector
        .route(QUERY, site.query_error("選擇的日期超過目前開放預訂之日期"));

    let pipeline = site.pipeline(fixtures::trip_selection(), SelectionMode::Auto);
    let (result, run) = run(&pipeline).await;

    assert!(matches!(result, Err(PipelineError::DateOutOfRange(_))));
    let snapshot = run.snapshot();
    assert_eq!(snapshot.status, RunStatus::Failed);
    assert_eq!(snapshot.state, PipelineState::Fatal);
    assert_eq!(site.connector.requests_to(QUERY).len(), 1);
    assert!(site.connector.requests_to(SELECT).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_list_only_stops_after_search() {
    let site = Site::new();
    site.connector.route(QUERY, site.train_list());

    let pipeline = site.pipeline(fixtures::trip_selection(), SelectionMode::ListOnly);
    let (result, run) = run(&pipeline).await;

    match result {
        Ok(BookingOutcome::Listed(candidates)) => {
            assert_eq!(candidates.len(), 2);
            assert_eq!(candidates[1].train_no, "0615");
        }
        other => panic!("expected a listing, got {:?}", other),
    }
    assert!(site.connector.requests_to(SELECT).is_empty());
    assert_eq!(run.snapshot().status, RunStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_fixed_train_skips_selection() {
    let site = Site::new();
    site.connector.route(
        QUERY,
        MockReply::page(&site.site.interface_url(1), pages::confirm_ticket_page(1)),
    );
    site.connector.route(
        CONFIRM,
        MockReply::page(
            &site.site.interface_url(2),
            pages::booking_result_page("07654321", "0803", &["3車12C"]),
        ),
    );
    let mut trip = fixtures::trip_selection();
    trip.train_no = Some("0803".to_string());

    let pipeline = site.pipeline(trip, SelectionMode::Auto);
    let (result, _run) = run(&pipeline).await;

    assert_eq!(booked(result).reservation_code, "07654321");
    assert!(site.connector.requests_to(SELECT).is_empty());
    let query = site.connector.requests_to(QUERY);
    assert_eq!(query[0].form_value("toTrainIDInputField"), Some("0803"));
    let confirm = site.connector.requests_to(CONFIRM);
    assert_eq!(confirm[0].url, site.site.confirm_submit_url(1));
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_challenges_restart_session() {
    let site = Site::new();
    site.connector.route(QUERY, site.train_list());
    site.serve_select_and_confirm();

    let ocr = MockCodeRecognizer::new();
    ocr.push(Ok(None));
    ocr.push(Ok(None));
    ocr.push(Ok(Some("AB12".to_string())));
    let solver = ChallengeSolver::new(PrimaryEngine::Specialized).with_specialized(Arc::new(ocr));
    let retry = RetryConfig {
        recognition_failures_before_restart: 2,
        ..fixtures::fast_retry_config()
    };

    let pipeline = site
        .pipeline_with(fixtures::trip_selection(), SelectionMode::Auto, solver, retry)
        .unwrap();
    let (result, run) = run(&pipeline).await;

    booked(result);
    let snapshot = run.snapshot();
    assert_eq!(snapshot.recognition_failures, 2);
    assert_eq!(snapshot.sessions_opened, 2);
    assert_eq!(snapshot.search_attempts, 1);
    assert_eq!(site.connector.connect_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transport_exhaustion_is_fatal() {
    let site = Site::new();
    site.connector.route(QUERY, site.train_list());
    site.connector.route(
        SELECT,
        MockReply::error(TransportError::Timeout("read timed out".into())),
    );

    let pipeline = site.pipeline(fixtures::trip_selection(), SelectionMode::Auto);
    let (result, run) = run(&pipeline).await;

    match result {
        Err(PipelineError::Transport { stage, attempts, .. }) => {
            assert_eq!(stage, Stage::SelectTrain);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected a transport failure, got {:?}", other),
    }
    assert_eq!(site.connector.requests_to(SELECT).len(), 3);
    assert_eq!(run.snapshot().status, RunStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_cooldown() {
    let site = Site::new();
    site.connector
        .route(QUERY, site.query_error("去程查無可售車次或選擇的車次已售完"));
    let retry = RetryConfig {
        sold_out_cooldown_secs: 600,
        ..fixtures::fast_retry_config()
    };
    let pipeline = site
        .pipeline_with(
            fixtures::trip_selection(),
            SelectionMode::Auto,
            fixtures::agreeing_solver("AB12"),
            retry,
        )
        .unwrap();

    let run = RunContext::new("thsrc");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        trigger.cancel();
    });

    let result = pipeline.run(&run, &cancel).await;

    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert_eq!(run.snapshot().status, RunStatus::Cancelled);
    assert_eq!(site.connector.requests_to(QUERY).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_query_ceiling_restarts_session() {
    let site = Site::new();
    site.connector.route_sequence(
        QUERY,
        vec![
            site.query_error("檢測碼輸入錯誤，請確認後重新輸入"),
            site.query_error("檢測碼輸入錯誤，請確認後重新輸入"),
            site.train_list(),
        ],
    );
    site.serve_select_and_confirm();
    let retry = RetryConfig {
        query_max_retries: 2,
        ..fixtures::fast_retry_config()
    };

    let pipeline = site
        .pipeline_with(
            fixtures::trip_selection(),
            SelectionMode::Auto,
            fixtures::agreeing_solver("AB12"),
            retry,
        )
        .unwrap();
    let (result, run) = run(&pipeline).await;

    booked(result);
    assert_eq!(site.connector.connect_count(), 2);
    // two counted misses in the first session, then a fresh one
    let query = site.connector.requests_to(QUERY);
    assert_eq!(query.len(), 3);
    assert!(query[0].url.contains(";jsessionid=MOCKSESSION1"));
    assert!(query[1].url.contains(";jsessionid=MOCKSESSION1"));
    assert!(query[2].url.contains(";jsessionid=MOCKSESSION2"));

    let snapshot = run.snapshot();
    assert_eq!(run.retries(Stage::Query), 0);
    assert_eq!(snapshot.sessions_opened, 2);
    assert_eq!(snapshot.search_attempts, 1);
    assert!(snapshot
        .events
        .iter()
        .any(|event| event.state == PipelineState::Restart));
}

#[tokio::test(start_paused = true)]
async fn test_confirm_ceiling_is_fatal() {
    let site = Site::new();
    site.connector.route(QUERY, site.train_list());
    site.connector.route(
        SELECT,
        MockReply::page(&site.site.interface_url(2), pages::confirm_ticket_page(1)),
    );
    site.connector.route(
        CONFIRM,
        MockReply::page(&site.site.interface_url(2), pages::error_page("驗證碼輸入錯誤")),
    );

    let pipeline = site.pipeline(fixtures::trip_selection(), SelectionMode::Auto);
    let (result, run) = run(&pipeline).await;

    match result {
        Err(PipelineError::StageExhausted { stage, retries, .. }) => {
            assert_eq!(stage, Stage::ConfirmTicket);
            assert_eq!(retries, 5);
        }
        other => panic!("expected an exhausted confirm stage, got {:?}", other),
    }
    assert_eq!(site.connector.requests_to(CONFIRM).len(), 5);
    assert_eq!(site.connector.connect_count(), 1);
    assert_eq!(run.retries(Stage::ConfirmTicket), 5);
    let snapshot = run.snapshot();
    assert_eq!(snapshot.status, RunStatus::Failed);
    assert_eq!(snapshot.sessions_opened, 1);
}

#[tokio::test(start_paused = true)]
async fn test_booking_without_reservation_code_is_noted() {
    let site = Site::new();
    site.connector.route(QUERY, site.train_list());
    site.connector.route(
        SELECT,
        MockReply::page(&site.site.interface_url(2), pages::confirm_ticket_page(1)),
    );
    site.connector.route(
        CONFIRM,
        MockReply::page(&site.site.interface_url(3), "<div><p>訂位處理中</p></div>"),
    );

    let pipeline = site.pipeline(fixtures::trip_selection(), SelectionMode::Auto);
    let (result, run) = run(&pipeline).await;

    let receipt = booked(result);
    assert!(!receipt.has_reservation_code());
    assert!(run
        .snapshot()
        .events
        .iter()
        .any(|event| event.detail.as_deref() == Some("no reservation code on the result page")));
}
