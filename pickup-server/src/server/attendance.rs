use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use pickup_shared::api::{AttendanceItemDto, PresentChildDto, ScanReq, ScanResp};
use pickup_shared::domain::EventType;
use tracing::{info, warn};

use super::push::{DeliveryFailure, DeliveryResult};
use super::{AppError, AppState};
use crate::storage::models::{AttendanceEntry, ChildAccount, DayEntry};

/// Title and body of the parent notification for an event.
pub fn notification_text(event: EventType, child_name: &str) -> (String, String) {
    match event {
        EventType::Checkin => (
            "Child Checkin".to_string(),
            format!("Your child {} has arrived at school.", child_name),
        ),
        EventType::Checkout => (
            "Child Checkout".to_string(),
            format!("Your child {} is ready for pickup!", child_name),
        ),
    }
}

fn scan_message(event: EventType) -> &'static str {
    match event {
        EventType::Checkin => "Student checked-in successfully",
        EventType::Checkout => "Student checked-out successfully",
    }
}

async fn notify_parent(
    state: &AppState,
    child: &ChildAccount,
    title: &str,
    body: &str,
) -> DeliveryResult {
    let Some(device_token) = child
        .device_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        return DeliveryResult::Failed(DeliveryFailure::MissingDeviceToken);
    };
    match &state.push {
        Some(push) => push.send(device_token, title, body).await,
        None => DeliveryResult::Failed(DeliveryFailure::Disabled),
    }
}

/// Records a check-in or check-out for a child and notifies the parent.
///
/// The log append runs alongside the notification and does not depend on its
/// outcome; a failed delivery only shows up as `notificationSent: false`.
pub async fn process_scan(state: &AppState, req: ScanReq) -> Result<ScanResp, AppError> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(AppError::invalid_input("username is required"));
    }
    let event: EventType = req
        .event_type
        .trim()
        .parse()
        .map_err(|_| AppError::InvalidEventType)?;

    let mut child = state
        .store
        .find_child_by_username(username)
        .await?
        .ok_or(AppError::ChildNotFound)?;

    let (title, body) = notification_text(event, &child.name);
    let recorded_at = Utc::now().naive_utc();
    let (delivery, appended) = tokio::join!(
        notify_parent(state, &child, &title, &body),
        state
            .store
            .append_attendance(child.id, event.is_checkin(), recorded_at)
    );
    let entry = appended?;
    info!(
        child_id = child.id,
        entry_id = entry.id,
        event = %event,
        "scan: attendance recorded"
    );

    let (notification_sent, notification_error) = match delivery {
        DeliveryResult::Sent { .. } => (true, None),
        DeliveryResult::Failed(failure) => {
            warn!(child_id = child.id, reason = %failure, "scan: parent not notified");
            if failure.is_stale_token() {
                match state.store.set_device_token(child.id, None).await {
                    Ok(_) => child.device_token = None,
                    Err(e) => warn!(child_id = child.id, error = %e, "scan: stale token kept"),
                }
            }
            (false, Some(failure.to_string()))
        }
    };

    Ok(ScanResp {
        message: scan_message(event).to_string(),
        notification_sent,
        notification_error,
        child: child.to_dto(),
    })
}

fn rfc3339(ts: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(ts, Utc).to_rfc3339()
}

fn local_midnight_utc(tz: Tz, date: NaiveDate) -> NaiveDateTime {
    let midnight = date.and_time(NaiveTime::MIN);
    // Zones that skip midnight on a DST switch start the day an hour later.
    tz.from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(midnight + Duration::hours(1)))
                .earliest()
        })
        .map(|t| t.naive_utc())
        .unwrap_or(midnight)
}

/// UTC bounds `[start, end)` of the calendar day containing `now` in `tz`.
pub fn day_bounds(tz: Tz, now: DateTime<Utc>) -> (NaiveDateTime, NaiveDateTime) {
    let today = now.with_timezone(&tz).date_naive();
    let tomorrow = today.succ_opt().unwrap_or(today);
    (
        local_midnight_utc(tz, today),
        local_midnight_utc(tz, tomorrow),
    )
}

/// Children whose last entry of the day is a check-in, most recent first.
pub fn present_children(entries: &[DayEntry]) -> Vec<PresentChildDto> {
    let mut ordered: Vec<&DayEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| (e.recorded_at, e.id));

    let mut last: HashMap<i32, &DayEntry> = HashMap::new();
    for entry in ordered {
        last.insert(entry.child_id, entry);
    }

    let mut present: Vec<&DayEntry> = last.into_values().filter(|e| e.is_checkin).collect();
    present.sort_by(|a, b| (b.recorded_at, b.id).cmp(&(a.recorded_at, a.id)));
    present
        .into_iter()
        .map(|e| PresentChildDto {
            name: e.child_name.clone(),
            timestamp: rfc3339(e.recorded_at),
        })
        .collect()
}

pub async fn present_today(state: &AppState) -> Result<Vec<PresentChildDto>, AppError> {
    let (from, to) = day_bounds(state.config.tz(), Utc::now());
    let entries = state.store.list_attendance_between(from, to).await?;
    Ok(present_children(&entries))
}

pub fn history_items(entries: Vec<AttendanceEntry>) -> Vec<AttendanceItemDto> {
    entries
        .into_iter()
        .map(|e| AttendanceItemDto {
            is_checkin: e.is_checkin,
            timestamp: rfc3339(e.recorded_at),
        })
        .collect()
}
