//! Form payloads of the three booking stages.

use tracing::debug;

use super::selection::{Candidate, TRAIN_GROUP};
use super::trip::TripSelection;
use crate::document::Document;
use crate::ids::{is_roc_id, mask_id};
use crate::recognizer::ChallengeCode;
use crate::site::SiteConfig;
use crate::stage::{ExpectedMarker, Stage, StageRequest};

const MEMBER_RADIO: &str =
    "TicketMemberSystemInputPanel:TakerMemberSystemDataView:memberSystemRadioGroup";
const DISABLED_TICKET: &str = "愛心票";
const ELDER_TICKET: &str = "敬老票";

/// Ticket rows on the search form, in [`TripSelection::ticket_amounts`] order.
const TICKET_ROWS: usize = 6;

fn field(name: impl Into<String>, value: impl Into<String>) -> (String, String) {
    (name.into(), value.into())
}

/// Stage 1: the search form with the solved challenge.
pub fn query_request(
    site: &SiteConfig,
    trip: &TripSelection,
    code: &ChallengeCode,
    jsessionid: Option<&str>,
) -> StageRequest {
    let by_train = trip.train_no.as_deref();
    let date = trip.date_field();

    let mut form = vec![
        field("BookingS1Form:hf:0", ""),
        field("tripCon:typesoftrip", "0"),
        field("trainCon:trainRadioGroup", trip.car_type.form_value()),
        field("seatCon:seatRadioGroup", trip.seat_preference.form_value()),
        field(
            "bookingMethod",
            if by_train.is_some() { "radio33" } else { "radio31" },
        ),
        field("selectStartStation", trip.start.id().to_string()),
        field("selectDestinationStation", trip.dest.id().to_string()),
        field("toTimeInputField", date.clone()),
        field(
            "toTimeTable",
            if by_train.is_some() {
                String::new()
            } else {
                trip.time_slot()
            },
        ),
        field("toTrainIDInputField", by_train.unwrap_or_default()),
        field("backTimeInputField", date),
        field("backTimeTable", ""),
        field("backTrainIDInputField", ""),
    ];

    let amounts = trip.ticket_amounts();
    for (row, amount) in amounts.iter().enumerate().take(TICKET_ROWS) {
        form.push(field(
            format!("ticketPanel:rows:{}:ticketAmount", row),
            amount.clone(),
        ));
    }

    form.extend([
        field("trainTypeContainer:typesoftrain", "0"),
        field("ticketTypeNum", ""),
        field("homeCaptcha:securityCode", code.as_str()),
        field("SubmitButton", "開始查詢"),
        field("portalTag", "false"),
    ]);

    StageRequest::post(
        Stage::Query,
        site.query_submit_url(jsessionid),
        form,
        ExpectedMarker::Url(site.interface_url(1)),
    )
    .with_referer(site.root_url())
}

/// Stage 2: pick one of the listed trains.
pub fn select_request(site: &SiteConfig, candidate: &Candidate) -> StageRequest {
    let form = vec![
        field("BookingS2Form:hf:0", ""),
        field(TRAIN_GROUP, candidate.value.clone()),
        field("SubmitButton", "Confirm"),
    ];

    StageRequest::post(
        Stage::SelectTrain,
        site.select_submit_url(),
        form,
        ExpectedMarker::Url(site.interface_url(2)),
    )
    .with_referer(site.interface_url(1))
}

/// Stage 3: passenger details, built against the ticket page the previous
/// stage returned.
///
/// With a fixed train number the select stage never ran, so the ticket page
/// is interface 1 and success lands on interface 2.
pub fn confirm_request(site: &SiteConfig, trip: &TripSelection, page: &Document) -> StageRequest {
    let interface: u8 = if trip.train_no.is_some() { 1 } else { 2 };
    let passenger = &trip.passenger;
    let id = passenger.id.trim();

    let mut form = vec![
        field("BookingS3FormSP:hf:0", ""),
        field("diffOver", "1"),
        field("isSPromotion", "1"),
        field("passengerCount", trip.passenger_count().to_string()),
        field("isGoBackM", ""),
        field("backHome", ""),
        field("TgoError", "1"),
        field("idInputRadio", if is_roc_id(id) { "0" } else { "1" }),
        field("dummyId", id),
        field("dummyPhone", passenger.phone.trim()),
        field("email", passenger.email.trim()),
        field("agree", "on"),
    ];

    let member_choice = if passenger.tgo_id.is_some() {
        1
    } else if passenger.tax_id.is_some() {
        2
    } else {
        0
    };
    let options: Vec<String> = page
        .select_all(&format!("input[name='{}']", MEMBER_RADIO))
        .into_iter()
        .filter_map(|node| node.attr("value").map(str::to_string))
        .collect();
    match options.get(member_choice).or_else(|| options.first()) {
        Some(value) => form.push(field(MEMBER_RADIO, value.clone())),
        None => debug!("Ticket page has no member radio group"),
    }
    if let Some(tgo) = &passenger.tgo_id {
        form.push(field(format!("{}:memberShipNumber", MEMBER_RADIO), tgo.clone()));
    }
    if let Some(tax) = &passenger.tax_id {
        form.push(field(format!("{}:GUINumber:", MEMBER_RADIO), tax.clone()));
    }

    for node in page.select_all("input[name$='passengerDataIdNumber']") {
        if let Some(name) = node.attr("name") {
            set_field(&mut form, name, id);
        }
    }

    apply_concession_ids(&mut form, page, DISABLED_TICKET, &passenger.disabled_ids);
    apply_concession_ids(&mut form, page, ELDER_TICKET, &passenger.elder_ids);

    debug!(
        id = %mask_id(id),
        passengers = trip.passenger_count(),
        interface,
        "Built confirmation form"
    );

    StageRequest::post(
        Stage::ConfirmTicket,
        site.confirm_submit_url(interface),
        form,
        ExpectedMarker::Url(site.interface_url(interface + 1)),
    )
    .with_referer(site.interface_url(interface))
}

/// Concession rows carry their own id field next to the ticket type input.
fn apply_concession_ids(
    form: &mut Vec<(String, String)>,
    page: &Document,
    ticket_label: &str,
    ids: &[String],
) {
    let rows = page.select_all(&format!("input[value='{}']", ticket_label));
    for (node, concession_id) in rows.into_iter().zip(ids) {
        let Some(name) = node.attr("name") else {
            continue;
        };
        set_field(form, name, ticket_label);
        let id_field = name.replace("passengerDataTypeName", "passengerDataIdNumber");
        set_field(form, &id_field, concession_id.trim());
        debug!(ticket = ticket_label, id = %mask_id(concession_id), "Concession id set");
    }
}

fn set_field(form: &mut Vec<(String, String)>, name: &str, value: &str) {
    match form.iter_mut().find(|(key, _)| key == name) {
        Some((_, existing)) => *existing = value.to_string(),
        None => form.push(field(name, value)),
    }
}
