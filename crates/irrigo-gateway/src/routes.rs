//! API route handlers for the gateway.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{NaiveDate, Utc};
use irrigo_core::model::{local_date, parse_time_of_day};
use irrigo_core::{IrrigationError, NewSchedule};
use irrigo_scheduler::records::CostCategory;
use irrigo_scheduler::store::LogStore;
use serde::Deserialize;
use std::sync::Arc;

use super::server::AppState;

fn error_json(e: &IrrigationError) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": false,
        "error": e.to_string(),
        "not_found": e.is_not_found(),
    }))
}

// ─── Health ─────────────────────────────────────────────

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "irrigo-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ─── Farms & crops ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateFarmRequest {
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub owner_name: Option<String>,
    pub owner_phone: Option<String>,
}

pub async fn list_farms(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.db.list_farms() {
        Ok(farms) => Json(serde_json::json!({"ok": true, "farms": farms})),
        Err(e) => error_json(&e),
    }
}

/// Create a farm, registering its owner first when one is given.
pub async fn create_farm(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateFarmRequest>,
) -> Json<serde_json::Value> {
    if body.name.trim().is_empty() {
        return error_json(&IrrigationError::InvalidInput("farm name is required".into()));
    }
    let owner = match body.owner_name.as_deref().filter(|n| !n.trim().is_empty()) {
        Some(name) => match state.db.create_profile(name, body.owner_phone.as_deref()) {
            Ok(profile) => Some(profile),
            Err(e) => return error_json(&e),
        },
        None => None,
    };
    match state
        .db
        .create_farm(owner.as_ref().map(|p| p.id.as_str()), &body.name, &body.location)
    {
        Ok(farm) => Json(serde_json::json!({"ok": true, "farm": farm, "owner": owner})),
        Err(e) => error_json(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCropRequest {
    pub farm_id: String,
    pub name: String,
}

pub async fn create_crop(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCropRequest>,
) -> Json<serde_json::Value> {
    match state.db.create_crop(&body.farm_id, &body.name) {
        Ok(crop) => Json(serde_json::json!({"ok": true, "crop": crop})),
        Err(e) => error_json(&e),
    }
}

// ─── Schedules ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub farm_id: String,
    pub crop_id: String,
    pub frequency_days: u32,
    pub duration_minutes: u32,
    /// "HH:MM" in the configured local offset.
    pub time_of_day: String,
}

pub async fn list_schedules(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.db.list_schedules() {
        Ok(schedules) => Json(serde_json::json!({"ok": true, "schedules": schedules})),
        Err(e) => error_json(&e),
    }
}

pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateScheduleRequest>,
) -> Json<serde_json::Value> {
    let time_of_day = match parse_time_of_day(&body.time_of_day) {
        Ok(t) => t,
        Err(e) => return error_json(&e),
    };
    let new = NewSchedule {
        farm_id: body.farm_id,
        crop_id: body.crop_id,
        frequency_days: body.frequency_days,
        duration_minutes: body.duration_minutes,
        time_of_day,
    };
    match state
        .db
        .create_schedule(&new, Utc::now(), state.config.scheduler.offset())
    {
        Ok(schedule) => Json(serde_json::json!({"ok": true, "schedule": schedule})),
        Err(e) => error_json(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

pub async fn set_schedule_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SetActiveRequest>,
) -> Json<serde_json::Value> {
    match state.db.set_schedule_active(&id, body.active) {
        Ok(()) => Json(serde_json::json!({"ok": true, "id": id, "active": body.active})),
        Err(e) => error_json(&e),
    }
}

pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.db.delete_schedule(&id) {
        Ok(deleted) => Json(serde_json::json!({"ok": deleted, "deleted": deleted})),
        Err(e) => error_json(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub water_used: f64,
    pub notes: Option<String>,
}

pub async fn complete_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CompleteRequest>,
) -> Json<serde_json::Value> {
    match state.completion.complete(&id, body.water_used, body.notes).await {
        Ok(done) => Json(serde_json::json!({
            "ok": true,
            "log": done.log,
            "next_due": done.next_due,
            "notifications_retired": done.notifications_retired,
        })),
        Err(e) => error_json(&e),
    }
}

pub async fn schedule_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.db.logs_for_schedule(&id).await {
        Ok(logs) => Json(serde_json::json!({"ok": true, "logs": logs})),
        Err(e) => error_json(&e),
    }
}

// ─── Notifications ──────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationQuery>,
) -> Json<serde_json::Value> {
    let center = state.notifications();
    let items: Vec<_> = center
        .list()
        .iter()
        .filter(|n| !query.unread_only || !n.read)
        .cloned()
        .collect();
    Json(serde_json::json!({
        "ok": true,
        "notifications": items,
        "unread": center.unread_count(),
    }))
}

pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let changed = state.notifications().mark_read(&id);
    Json(serde_json::json!({"ok": true, "changed": changed}))
}

pub async fn mark_all_notifications_read(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let changed = state.notifications().mark_all_read();
    Json(serde_json::json!({"ok": true, "changed": changed}))
}

/// Run a due/overdue scan now. Reports `busy` if the background loop is mid-scan.
pub async fn run_scan(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.scanner.try_scan().await {
        Some(Ok(report)) => Json(serde_json::json!({"ok": true, "report": report})),
        Some(Err(e)) => error_json(&e),
        None => Json(serde_json::json!({"ok": false, "busy": true, "error": "scan already in progress"})),
    }
}

// ─── Farm records ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FarmQuery {
    pub farm_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SoilReadingRequest {
    pub farm_id: String,
    pub moisture_percent: f64,
    pub sensor: Option<String>,
}

pub async fn list_soil_readings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FarmQuery>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "readings": state.soil.readings_for_farm(&query.farm_id),
        "latest": state.soil.latest_for_farm(&query.farm_id),
    }))
}

pub async fn record_soil_reading(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SoilReadingRequest>,
) -> Json<serde_json::Value> {
    let mut center = state.notifications();
    match state
        .soil
        .record(&body.farm_id, body.moisture_percent, body.sensor, &mut center, Utc::now())
    {
        Ok(reading) => Json(serde_json::json!({"ok": true, "reading": reading})),
        Err(e) => error_json(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AddCostRequest {
    pub farm_id: String,
    pub category: CostCategory,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    /// Defaults to today in the configured offset.
    pub incurred_on: Option<NaiveDate>,
}

pub async fn list_costs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FarmQuery>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "costs": state.costs.for_farm(&query.farm_id),
        "total": state.costs.total_for_farm(&query.farm_id),
    }))
}

pub async fn add_cost(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddCostRequest>,
) -> Json<serde_json::Value> {
    let incurred_on = body
        .incurred_on
        .unwrap_or_else(|| local_date(Utc::now(), state.config.scheduler.offset()));
    match state
        .costs
        .add(&body.farm_id, body.category, body.amount, &body.description, incurred_on)
    {
        Ok(item) => Json(serde_json::json!({"ok": true, "cost": item})),
        Err(e) => error_json(&e),
    }
}

pub async fn delete_cost(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.costs.remove(&id) {
        Ok(deleted) => Json(serde_json::json!({"ok": deleted, "deleted": deleted})),
        Err(e) => error_json(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub author: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

pub async fn list_posts(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "posts": state.community.list()}))
}

pub async fn create_post(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreatePostRequest>,
) -> Json<serde_json::Value> {
    match state.community.post(&body.author, &body.title, &body.body) {
        Ok(post) => Json(serde_json::json!({"ok": true, "post": post})),
        Err(e) => error_json(&e),
    }
}

pub async fn like_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.community.like(&id) {
        Ok(post) => Json(serde_json::json!({"ok": true, "post": post})),
        Err(e) => error_json(&e),
    }
}

pub async fn get_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.community.get(&id) {
        Some(post) => Json(serde_json::json!({"ok": true, "post": post})),
        None => error_json(&IrrigationError::NotFound(format!("post {id}"))),
    }
}

pub async fn delete_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.community.remove(&id) {
        Ok(deleted) => Json(serde_json::json!({"ok": deleted, "deleted": deleted})),
        Err(e) => error_json(&e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use irrigo_core::IrrigoConfig;
    use irrigo_scheduler::dispatch::{LogSmsSender, NoopNotifier};
    use irrigo_scheduler::store::ScheduleStore;
    use irrigo_scheduler::{IrrigationDb, MemoryKvStore};

    pub(crate) fn test_state() -> State<Arc<AppState>> {
        State(Arc::new(AppState::new(
            IrrigoConfig::default(),
            Arc::new(IrrigationDb::open_in_memory().unwrap()),
            Arc::new(MemoryKvStore::new()),
            Arc::new(LogSmsSender),
            Arc::new(NoopNotifier),
        )))
    }

    /// Farm + crop + schedule through the handlers. Returns (farm_id, schedule_id).
    async fn seed_schedule(state: &Arc<AppState>) -> (String, String) {
        let farm = create_farm(
            State(state.clone()),
            Json(CreateFarmRequest {
                name: "Hillside".into(),
                location: "Meru".into(),
                owner_name: Some("Achieng".into()),
                owner_phone: Some("+254711000222".into()),
            }),
        )
        .await
        .0;
        let farm_id = farm["farm"]["id"].as_str().unwrap().to_string();
        let crop = create_crop(
            State(state.clone()),
            Json(CreateCropRequest {
                farm_id: farm_id.clone(),
                name: "Beans".into(),
            }),
        )
        .await
        .0;
        let schedule = create_schedule(
            State(state.clone()),
            Json(CreateScheduleRequest {
                farm_id: farm_id.clone(),
                crop_id: crop["crop"]["id"].as_str().unwrap().to_string(),
                frequency_days: 2,
                duration_minutes: 30,
                time_of_day: "06:30".into(),
            }),
        )
        .await
        .0;
        assert_eq!(schedule["ok"], true, "{schedule}");
        (farm_id, schedule["schedule"]["id"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_health_check() {
        let json = health_check().await.0;
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn test_farm_and_schedule_listing() {
        let state = test_state().0;
        let (farm_id, schedule_id) = seed_schedule(&state).await;

        let farms = list_farms(State(state.clone())).await.0;
        assert_eq!(farms["farms"][0]["id"], farm_id.as_str());

        let schedules = list_schedules(State(state.clone())).await.0;
        let first = &schedules["schedules"][0];
        assert_eq!(first["id"], schedule_id.as_str());
        assert_eq!(first["farm_name"], "Hillside");
        assert_eq!(first["crop_name"], "Beans");
        assert_eq!(first["active"], true);
    }

    #[tokio::test]
    async fn test_create_schedule_rejects_bad_input() {
        let state = test_state().0;
        let bad_time = create_schedule(
            State(state.clone()),
            Json(CreateScheduleRequest {
                farm_id: "f".into(),
                crop_id: "c".into(),
                frequency_days: 1,
                duration_minutes: 10,
                time_of_day: "25:99".into(),
            }),
        )
        .await
        .0;
        assert_eq!(bad_time["ok"], false);

        let unknown_crop = create_schedule(
            State(state),
            Json(CreateScheduleRequest {
                farm_id: "f".into(),
                crop_id: "c".into(),
                frequency_days: 1,
                duration_minutes: 10,
                time_of_day: "06:00".into(),
            }),
        )
        .await
        .0;
        assert_eq!(unknown_crop["ok"], false);
        assert_eq!(unknown_crop["not_found"], true);
    }

    #[tokio::test]
    async fn test_scan_then_complete_flow() {
        let state = test_state().0;
        let (_, schedule_id) = seed_schedule(&state).await;
        state
            .db
            .update_next_due(&schedule_id, Utc::now() + Duration::minutes(30))
            .await
            .unwrap();

        let scan = run_scan(State(state.clone())).await.0;
        assert_eq!(scan["ok"], true, "{scan}");
        assert_eq!(scan["report"]["due_soon"], 1);

        let listed = list_notifications(State(state.clone()), Query(NotificationQuery::default())).await.0;
        assert_eq!(listed["unread"], 1);
        assert_eq!(listed["notifications"][0]["type"], "irrigation-due");

        // Second scan is deduplicated.
        let again = run_scan(State(state.clone())).await.0;
        assert_eq!(again["report"]["skipped_duplicates"], 1);

        let done = complete_schedule(
            State(state.clone()),
            Path(schedule_id.clone()),
            Json(CompleteRequest {
                water_used: 80.0,
                notes: Some("drip line".into()),
            }),
        )
        .await
        .0;
        assert_eq!(done["ok"], true, "{done}");
        assert_eq!(done["notifications_retired"], 1);

        let unread = list_notifications(State(state.clone()), Query(NotificationQuery { unread_only: true }))
            .await
            .0;
        assert_eq!(unread["unread"], 0);
        assert!(unread["notifications"].as_array().unwrap().is_empty());

        let logs = schedule_logs(State(state), Path(schedule_id)).await.0;
        assert_eq!(logs["logs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_complete_unknown_schedule() {
        let json = complete_schedule(
            test_state(),
            Path("missing".into()),
            Json(CompleteRequest {
                water_used: 10.0,
                notes: None,
            }),
        )
        .await
        .0;
        assert_eq!(json["ok"], false);
        assert_eq!(json["not_found"], true);
    }

    #[tokio::test]
    async fn test_pause_and_delete_schedule() {
        let state = test_state().0;
        let (_, schedule_id) = seed_schedule(&state).await;

        let paused = set_schedule_active(
            State(state.clone()),
            Path(schedule_id.clone()),
            Json(SetActiveRequest { active: false }),
        )
        .await
        .0;
        assert_eq!(paused["ok"], true);
        assert!(state.db.active_schedules().await.unwrap().is_empty());

        let deleted = delete_schedule(State(state.clone()), Path(schedule_id.clone())).await.0;
        assert_eq!(deleted["deleted"], true);
        let again = delete_schedule(State(state), Path(schedule_id)).await.0;
        assert_eq!(again["deleted"], false);
    }

    #[tokio::test]
    async fn test_mark_read_endpoints() {
        let state = test_state().0;
        let missing = mark_notification_read(State(state.clone()), Path("nope".into())).await.0;
        assert_eq!(missing["changed"], false);
        let all = mark_all_notifications_read(State(state)).await.0;
        assert_eq!(all["changed"], 0);
    }

    #[tokio::test]
    async fn test_low_soil_reading_raises_alert() {
        let state = test_state().0;
        let (farm_id, _) = seed_schedule(&state).await;

        let json = record_soil_reading(
            State(state.clone()),
            Json(SoilReadingRequest {
                farm_id: farm_id.clone(),
                moisture_percent: 12.5,
                sensor: Some("tensiometer-1".into()),
            }),
        )
        .await
        .0;
        assert_eq!(json["ok"], true, "{json}");
        assert_eq!(state.notifications().unread_count(), 1);

        let readings = list_soil_readings(State(state.clone()), Query(FarmQuery { farm_id })).await.0;
        assert_eq!(readings["readings"].as_array().unwrap().len(), 1);
        assert_eq!(readings["latest"]["sensor"], "tensiometer-1");

        let out_of_range = record_soil_reading(
            State(state),
            Json(SoilReadingRequest {
                farm_id: "f".into(),
                moisture_percent: 140.0,
                sensor: None,
            }),
        )
        .await
        .0;
        assert_eq!(out_of_range["ok"], false);
    }

    #[tokio::test]
    async fn test_costs_total() {
        let state = test_state().0;
        for amount in [120.0, 30.5] {
            let json = add_cost(
                State(state.clone()),
                Json(AddCostRequest {
                    farm_id: "farm-1".into(),
                    category: CostCategory::Water,
                    amount,
                    description: "borehole".into(),
                    incurred_on: None,
                }),
            )
            .await
            .0;
            assert_eq!(json["ok"], true);
        }
        let json = list_costs(State(state), Query(FarmQuery { farm_id: "farm-1".into() })).await.0;
        assert_eq!(json["costs"].as_array().unwrap().len(), 2);
        assert!((json["total"].as_f64().unwrap() - 150.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_posts_and_likes() {
        let state = test_state().0;
        let created = create_post(
            State(state.clone()),
            Json(CreatePostRequest {
                author: "Kamau".into(),
                title: "Mulching tips".into(),
                body: "Cuts evaporation noticeably.".into(),
            }),
        )
        .await
        .0;
        let id = created["post"]["id"].as_str().unwrap().to_string();
        let liked = like_post(State(state.clone()), Path(id)).await.0;
        assert_eq!(liked["post"]["likes"], 1);
        let listed = list_posts(State(state)).await.0;
        assert_eq!(listed["posts"].as_array().unwrap().len(), 1);

        let missing = like_post(test_state(), Path("nope".into())).await.0;
        assert_eq!(missing["not_found"], true);
    }

    #[tokio::test]
    async fn test_delete_cost() {
        let state = test_state().0;
        let added = add_cost(
            State(state.clone()),
            Json(AddCostRequest {
                farm_id: "farm-1".into(),
                category: CostCategory::Energy,
                amount: 80.0,
                description: "pump fuel".into(),
                incurred_on: None,
            }),
        )
        .await
        .0;
        let id = added["cost"]["id"].as_str().unwrap().to_string();

        let deleted = delete_cost(State(state.clone()), Path(id.clone())).await.0;
        assert_eq!(deleted["deleted"], true);
        let again = delete_cost(State(state.clone()), Path(id)).await.0;
        assert_eq!(again["deleted"], false);

        let json = list_costs(State(state), Query(FarmQuery { farm_id: "farm-1".into() })).await.0;
        assert!(json["costs"].as_array().unwrap().is_empty());
        assert_eq!(json["total"].as_f64().unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_get_and_delete_post() {
        let state = test_state().0;
        let created = create_post(
            State(state.clone()),
            Json(CreatePostRequest {
                author: "Njeri".into(),
                title: "Night watering".into(),
                body: "Less loss to wind.".into(),
            }),
        )
        .await
        .0;
        let id = created["post"]["id"].as_str().unwrap().to_string();

        let fetched = get_post(State(state.clone()), Path(id.clone())).await.0;
        assert_eq!(fetched["post"]["title"], "Night watering");

        let deleted = delete_post(State(state.clone()), Path(id.clone())).await.0;
        assert_eq!(deleted["deleted"], true);
        let gone = get_post(State(state.clone()), Path(id)).await.0;
        assert_eq!(gone["ok"], false);
        assert_eq!(gone["not_found"], true);
        assert!(list_posts(State(state)).await.0["posts"].as_array().unwrap().is_empty());
    }
}
