//! Testing utilities: a scripted transport, scripted recognition engines and
//! canned site pages.
//!
//! # Example
//!
//! ```rust,ignore
//! use railbot_core::testing::{fixtures, pages, MockConnector, MockReply};
//!
//! let connector = Arc::new(MockConnector::new());
//! connector.route("?locale=tw", MockReply::page(url, pages::reservation_page("/c.png")));
//! connector.route("/c.png", MockReply::bytes(pages::CAPTCHA_IMAGE));
//!
//! let pipeline = BookingPipeline::new(
//!     connector.clone(),
//!     fixtures::agreeing_solver("AB12"),
//!     // ...
//! );
//! ```

mod mock_recognizer;
mod mock_transport;

pub use mock_recognizer::{MockCodeRecognizer, MockVisionRecognizer};
pub use mock_transport::{MockConnector, MockHttpClient, MockReply};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{NaiveDate, NaiveTime};
    use std::sync::Arc;

    use super::{MockCodeRecognizer, MockVisionRecognizer};
    use crate::booking::{
        CarType, Candidate, PassengerConfig, SeatPreference, Station, TicketCounts, TripSelection,
    };
    use crate::recognizer::{ChallengeSolver, PrimaryEngine};
    use crate::retry::{Backoff, RetryConfig};

    /// Taipei to Zuoying on 2026-11-02 around 10:00, one adult.
    pub fn trip_selection() -> TripSelection {
        TripSelection {
            start: Station::Taipei,
            dest: Station::Zuouing,
            date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            outbound_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            latest_arrival: None,
            latest_departure: None,
            train_no: None,
            tickets: TicketCounts {
                adult: 1,
                ..Default::default()
            },
            max_tickets: 10,
            car_type: CarType::Standard,
            seat_preference: SeatPreference::None,
            passenger: PassengerConfig {
                id: "A123456789".to_string(),
                phone: "0912345678".to_string(),
                email: "rider@example.com".to_string(),
                ..Default::default()
            },
        }
    }

    /// A candidate between two `HH:MM` times; the train number is derived
    /// from the departure.
    pub fn candidate(departure: &str, arrival: &str, discount: bool) -> Candidate {
        let departure = NaiveTime::parse_from_str(departure, "%H:%M").unwrap();
        let arrival = NaiveTime::parse_from_str(arrival, "%H:%M").unwrap();
        Candidate {
            departure,
            arrival,
            duration_minutes: (arrival - departure).num_minutes() as u32,
            train_no: format!("0{}", departure.format("%H%M")),
            discount: discount.then(|| "早鳥9折".to_string()),
            value: "radio1".to_string(),
        }
    }

    /// Default ceilings with waits short enough for tests.
    pub fn fast_retry_config() -> RetryConfig {
        RetryConfig {
            session_backoff_unit_ms: 10,
            sold_out_cooldown_secs: 1,
            recognition_failure_delay_ms: 10,
            transport: Backoff {
                max_retries: 2,
                initial_delay_ms: 10,
                max_delay_ms: 50,
                multiplier: 2.0,
                jitter: 0.0,
            },
            ..Default::default()
        }
    }

    /// Both engines always read `code`.
    pub fn agreeing_solver(code: &str) -> ChallengeSolver {
        ChallengeSolver::new(PrimaryEngine::Specialized)
            .with_specialized(Arc::new(MockCodeRecognizer::answering(code)))
            .with_vision(Arc::new(MockVisionRecognizer::answering(code)))
    }
}

/// Synthetic pages shaped like the booking site's.
pub mod pages {
    /// Bytes served as a challenge image.
    pub const CAPTCHA_IMAGE: &[u8] = b"\x89PNG\r\n\x1a\nchallenge";

    const TICKET_LABELS: [&str; 3] = ["全票", "敬老票", "愛心票"];

    fn wrap(body: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html lang="zh-TW"><head><meta charset="utf-8"><title>台灣高鐵 網路訂票</title></head>
<body>
{}
</body></html>"#,
            body
        )
    }

    /// Booking form with the challenge image at `captcha_src`.
    pub fn reservation_page(captcha_src: &str) -> String {
        wrap(&format!(
            r#"<form id="BookingS1Form" method="post" action="/IMINT/;jsessionid=X?wicket:interface=:0:BookingS1Form::IFormSubmitListener">
  <input type="hidden" name="BookingS1Form:hf:0" id="BookingS1Form_hf_0">
  <select name="selectStartStation"><option value="1">南港</option><option value="2">台北</option></select>
  <select name="selectDestinationStation"><option value="12">左營</option></select>
  <div id="BookingS1Form_homeCaptcha">
    <img id="BookingS1Form_homeCaptcha_passCode" class="captcha-img" src="{}">
    <input type="text" name="homeCaptcha:securityCode">
  </div>
  <input type="submit" name="SubmitButton" value="開始查詢">
</form>"#,
            captcha_src
        ))
    }

    /// Reservation history lookup form.
    pub fn history_page(captcha_src: &str) -> String {
        wrap(&format!(
            r#"<form id="HistoryForm" method="post" action="/IMINT/;jsessionid=X?wicket:interface=:0:HistoryForm::IFormSubmitListener">
  <input type="radio" name="typesofid" value="0" checked> 身分證字號
  <input type="radio" name="typesofid" value="1"> 護照號碼
  <input type="text" name="rocId">
  <input type="text" name="orderId">
  <img id="HistoryForm_divCaptcha_passCode" class="img-captcha" src="{}">
  <input type="text" name="divCaptcha:securityCode">
  <input type="submit" name="SubmitButton" value="查詢">
</form>"#,
            captcha_src
        ))
    }

    /// Ajax answer of the challenge refresh link.
    pub fn captcha_refresh_fragment(captcha_src: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><ajax-response><component id="BookingS1Form_homeCaptcha_passCode" ><![CDATA[<img id="BookingS1Form_homeCaptcha_passCode" class="captcha-img" src="{}"/>]]></component></ajax-response>"#,
            captcha_src
        )
    }

    /// A page carrying one error banner.
    pub fn error_page(message: &str) -> String {
        wrap(&format!(
            r#"<div id="feedMSG"><ul><li><span class="feedbackPanelERROR">{}</span></li></ul></div>"#,
            message
        ))
    }

    /// One train on the results page.
    #[derive(Debug, Clone)]
    pub struct TrainRow {
        pub train_no: String,
        pub departure: String,
        pub arrival: String,
        pub discount: Option<String>,
    }

    impl TrainRow {
        pub fn new(train_no: &str, departure: &str, arrival: &str, discount: Option<&str>) -> Self {
            Self {
                train_no: train_no.to_string(),
                departure: departure.to_string(),
                arrival: arrival.to_string(),
                discount: discount.map(str::to_string),
            }
        }

        fn duration(&self) -> String {
            let minutes = |t: &str| {
                let (h, m) = t.split_once(':').unwrap_or(("0", "0"));
                h.parse::<i64>().unwrap_or(0) * 60 + m.parse::<i64>().unwrap_or(0)
            };
            let total = (minutes(&self.arrival) - minutes(&self.departure)).rem_euclid(24 * 60);
            format!("{}:{:02}", total / 60, total % 60)
        }
    }

    /// Search results; radio values are `radio1`, `radio2`, ... in row order.
    pub fn train_list_page(rows: &[TrainRow]) -> String {
        let items: String = rows
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                let duration = row.duration();
                format!(
                    r#"
  <label class="result-item">
    <input type="radio" name="TrainQueryDataViewPanel:TrainGroup" class="uk-radio" querycode="{train}" querydeparture="{dep}" queryarrival="{arr}" queryestimatedtime="{duration}" value="radio{value}">
    <div class="uk-card">
      <div class="departure-time">{dep}</div>
      <div class="arrival-time">{arr}</div>
      <div class="duration"><span><i class="material-icons">schedule</i>{duration}</span>｜<span><i class="material-icons">directions_railway</i>{train}</span></div>
      <div class="discount">{discount}</div>
    </div>
  </label>"#,
                    train = row.train_no,
                    dep = row.departure,
                    arr = row.arrival,
                    duration = duration,
                    value = idx + 1,
                    discount = row
                        .discount
                        .as_deref()
                        .map(|d| format!("<span>{}</span>", d))
                        .unwrap_or_default(),
                )
            })
            .collect();

        wrap(&format!(
            r#"<form id="BookingS2Form" method="post" action="/IMINT/?wicket:interface=:1:BookingS2Form::IFormSubmitListener">
  <input type="hidden" name="BookingS2Form:hf:0">{}
  <input type="submit" name="SubmitButton" value="確認車次">
</form>"#,
            items
        ))
    }

    /// Passenger details form with `passengers` ticket rows. Rows are labelled
    /// 全票, 敬老票, 愛心票 in turn.
    pub fn confirm_ticket_page(passengers: usize) -> String {
        let rows: String = (0..passengers)
            .map(|i| {
                format!(
                    r#"
  <div class="passenger-row">
    <input type="hidden" name="TicketPassengerInfoInputPanel:passengerDataView:{i}:passengerDataView2:passengerDataTypeName" value="{label}">
    <input type="text" name="TicketPassengerInfoInputPanel:passengerDataView:{i}:passengerDataView2:passengerDataIdNumber" value="">
  </div>"#,
                    i = i,
                    label = TICKET_LABELS[i % TICKET_LABELS.len()],
                )
            })
            .collect();

        wrap(&format!(
            r#"<form id="BookingS3FormSP" method="post" action="/IMINT/?wicket:interface=:2:BookingS3Form::IFormSubmitListener">
  <input type="hidden" name="BookingS3FormSP:hf:0">
  <input type="radio" name="idInputRadio" value="0" checked>
  <input type="text" name="dummyId">
  <input type="text" name="dummyPhone">
  <input type="text" name="email">
  <input type="radio" name="TicketMemberSystemInputPanel:TakerMemberSystemDataView:memberSystemRadioGroup" value="radio56" checked> 非高鐵會員
  <input type="radio" name="TicketMemberSystemInputPanel:TakerMemberSystemDataView:memberSystemRadioGroup" value="radio58"> 高鐵會員 TGo
  <input type="radio" name="TicketMemberSystemInputPanel:TakerMemberSystemDataView:memberSystemRadioGroup" value="radio60"> 企業會員統編{}
  <input type="checkbox" name="agree">
  <input type="submit" name="SubmitButton" value="完成訂位">
</form>"#,
            rows
        ))
    }

    fn ticket_card(train_no: &str) -> String {
        format!(
            r#"<div class="ticket-card">
    <span class="date">2026/11/02</span>
    <span id="setTrainCode0">{}</span>
    <p class="departure-time">08:06</p>
    <p class="departure-stn">台北</p>
    <p class="arrival-time">09:36</p>
    <p class="arrival-stn">左營</p>
  </div>"#,
            train_no
        )
    }

    fn seat_labels(seats: &[&str]) -> String {
        seats
            .iter()
            .map(|seat| format!(r#"<div class="seat-label">{}</div>"#, seat))
            .collect()
    }

    /// Result page of a completed reservation.
    pub fn booking_result_page(pnr: &str, train_no: &str, seats: &[&str]) -> String {
        wrap(&format!(
            r#"<div class="ticket-summary">
  <p class="pnr-code">{pnr}</p>
  <p class="payment-status">未付款</p>
  <div class="car-type"><p class="info-title">車廂</p><p class="info-data">標準車廂</p></div>
  <div class="ticket-type"><div>全票 {count}張</div></div>
  <span id="setTrainTotalPriceValue">TWD 2,980</span>
  <span id="InfoEstimatedTime0">01:30</span>
  {card}
  <div class="detail">{seats}</div>
</div>"#,
            pnr = pnr,
            count = seats.len(),
            card = ticket_card(train_no),
            seats = seat_labels(seats),
        ))
    }

    /// Details of an existing reservation, with its cancel button.
    pub fn booking_details_page(pnr: &str) -> String {
        wrap(&format!(
            r#"<div class="ticket-summary">
  <span class="pnr-code">{pnr}</span>
  <p class="payment-status">已付款</p>
  <span id="setTrainTotalPriceValue">TWD 1,490</span>
  {card}
  <div class="detail">{seats}</div>
</div>
<form id="HistoryDetailsForm" method="post" action="/IMINT/?wicket:interface=:1:HistoryDetailsForm::IFormSubmitListener">
  <input type="hidden" name="HistoryDetailsForm:hf:0" value="">
  <input type="submit" name="SubmitButton" value="取消訂位">
</form>"#,
            pnr = pnr,
            card = ticket_card("0803"),
            seats = seat_labels(&["5車7A"]),
        ))
    }

    /// Confirmation shown after a cancellation.
    pub fn cancel_success_page() -> String {
        wrap(r#"<div class="result"><h2>取消訂位成功</h2><p>您的訂位已完成退票作業。</p></div>"#)
    }

    /// A response that neither confirms nor refuses.
    pub fn cancel_unclear_page() -> String {
        wrap(r#"<div class="result"><p>系統處理中，請稍後至訂位紀錄確認。</p></div>"#)
    }
}
