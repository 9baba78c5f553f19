use axum::{
    Extension, Router,
    body::Bytes,
    extract::{Path, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{
        Json, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post, put},
};
use futures::{Stream, stream};
use monitor_core::{
    Error,
    auth::AuthService,
    broadcast::Broadcaster,
    config::Config,
    db::{
        DatabasePool, PgGroupRepository, PgMonitorRepository, PgTeamRepository,
        PgUserRepository,
    },
    models::{MonitorGroup, Team, User},
    monitor::{CheckEngine, Monitor, MonitorRegistry, MonitorResponse},
    permission::Role,
    repository::{
        GroupRepository, InMemoryGroupRepository, InMemoryMonitorRepository,
        InMemoryTeamRepository, InMemoryUserRepository, MonitorRepository, TeamRepository,
        UserRepository,
    },
    service::{GroupService, MonitorService, TeamService, UserService},
};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};

pub struct Repositories {
    pub monitors: Arc<dyn MonitorRepository>,
    pub groups: Arc<dyn GroupRepository>,
    pub teams: Arc<dyn TeamRepository>,
    pub users: Arc<dyn UserRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            monitors: Arc::new(InMemoryMonitorRepository::new()),
            groups: Arc::new(InMemoryGroupRepository::new()),
            teams: Arc::new(InMemoryTeamRepository::new()),
            users: Arc::new(InMemoryUserRepository::new()),
        }
    }

    pub fn postgres(pool: DatabasePool, registry: Arc<MonitorRegistry>) -> Self {
        Self {
            monitors: Arc::new(PgMonitorRepository::new(pool.clone(), registry)),
            groups: Arc::new(PgGroupRepository::new(pool.clone())),
            teams: Arc::new(PgTeamRepository::new(pool.clone())),
            users: Arc::new(PgUserRepository::new(pool)),
        }
    }
}

pub struct AppState {
    pub monitors: MonitorService,
    pub groups: GroupService,
    pub teams: TeamService,
    pub users: UserService,
}

impl AppState {
    pub fn new(
        config: &Config,
        repositories: Repositories,
        registry: Arc<MonitorRegistry>,
        engine: CheckEngine,
    ) -> Self {
        let auth = AuthService::new(&config.auth.jwt_secret, config.auth.jwt_expiration);
        let events = Arc::new(Broadcaster::with_capacity(config.checks.event_buffer));
        let Repositories {
            monitors,
            groups,
            teams,
            users,
        } = repositories;
        Self {
            monitors: MonitorService::new(
                monitors.clone(),
                teams.clone(),
                groups.clone(),
                registry,
                Arc::new(engine),
                events.clone(),
            ),
            groups: GroupService::new(groups.clone(), teams.clone(), monitors.clone()),
            teams: TeamService::new(teams, users.clone(), monitors, groups, events),
            users: UserService::new(users, auth),
        }
    }
}

#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Decode(_) | Error::InvalidMonitor(_) | Error::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error_message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "request failed");
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}

/// Identity of the caller, inserted by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
}

async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| Error::auth("missing bearer token"))?;

    let claims = state.users.auth().verify_token(token).inspect_err(|err| {
        warn!(error = %err, "rejected bearer token");
    })?;

    req.extensions_mut().insert(AuthenticatedUser {
        username: claims.sub,
    });
    Ok(next.run(req).await)
}

pub fn create_app(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/api/teams", get(list_teams).post(create_team))
        .route(
            "/api/teams/{team}",
            get(get_team).put(update_team).delete(delete_team),
        )
        .route("/api/teams/{team}/members", post(add_member))
        .route(
            "/api/teams/{team}/members/{user}",
            put(change_member_role).delete(remove_member),
        )
        .route(
            "/api/teams/{team}/groups",
            get(list_groups).post(create_group),
        )
        .route(
            "/api/teams/{team}/groups/{group}",
            get(get_group).put(update_group).delete(delete_group),
        )
        .route(
            "/api/teams/{team}/monitors",
            get(list_monitors).post(create_monitor),
        )
        .route(
            "/api/teams/{team}/monitors/{id}",
            get(get_monitor).put(update_monitor).delete(delete_monitor),
        )
        .route("/api/teams/{team}/monitors/{id}/run", post(run_monitor))
        .route("/api/teams/{team}/events", get(monitor_events))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now()
    }))
}

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.users.register(&body.username, &body.password).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Credentials>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = state.users.login(&body.username, &body.password).await?;
    Ok(Json(json!({
        "token": token,
        "tokenType": "Bearer"
    })))
}

/// Body of team and monitor group create/update requests.
#[derive(Debug, Deserialize)]
struct NamedRequest {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct AddMemberRequest {
    username: String,
    role: Role,
}

#[derive(Debug, Deserialize)]
struct ChangeRoleRequest {
    role: Role,
}

async fn list_teams(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<Team>>, ApiError> {
    Ok(Json(state.teams.list_teams(&user.username).await?))
}

async fn create_team(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<NamedRequest>,
) -> Result<(StatusCode, Json<Team>), ApiError> {
    let team = state
        .teams
        .create_team(&user.username, &body.name, &body.description)
        .await?;
    Ok((StatusCode::CREATED, Json(team)))
}

async fn get_team(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(team): Path<String>,
) -> Result<Json<Team>, ApiError> {
    Ok(Json(state.teams.get_team(&user.username, &team).await?))
}

async fn update_team(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(team): Path<String>,
    Json(body): Json<NamedRequest>,
) -> Result<Json<Team>, ApiError> {
    let team = state
        .teams
        .update_team(&user.username, &team, &body.name, &body.description)
        .await?;
    Ok(Json(team))
}

async fn delete_team(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(team): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.teams.delete_team(&user.username, &team).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_member(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(team): Path<String>,
    Json(body): Json<AddMemberRequest>,
) -> Result<Json<Team>, ApiError> {
    let team = state
        .teams
        .add_member(&user.username, &team, &body.username, body.role)
        .await?;
    Ok(Json(team))
}

async fn change_member_role(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((team, member)): Path<(String, String)>,
    Json(body): Json<ChangeRoleRequest>,
) -> Result<Json<Team>, ApiError> {
    let team = state
        .teams
        .change_member_role(&user.username, &team, &member, body.role)
        .await?;
    Ok(Json(team))
}

async fn remove_member(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((team, member)): Path<(String, String)>,
) -> Result<Json<Team>, ApiError> {
    let team = state
        .teams
        .remove_member(&user.username, &team, &member)
        .await?;
    Ok(Json(team))
}

async fn list_groups(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(team): Path<String>,
) -> Result<Json<Vec<MonitorGroup>>, ApiError> {
    Ok(Json(state.groups.list_groups(&user.username, &team).await?))
}

async fn create_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(team): Path<String>,
    Json(body): Json<NamedRequest>,
) -> Result<(StatusCode, Json<MonitorGroup>), ApiError> {
    let group = state
        .groups
        .create_group(&user.username, &team, &body.name, &body.description)
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn get_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((team, group)): Path<(String, String)>,
) -> Result<Json<MonitorGroup>, ApiError> {
    Ok(Json(state.groups.get_group(&user.username, &team, &group).await?))
}

async fn update_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((team, group)): Path<(String, String)>,
    Json(body): Json<NamedRequest>,
) -> Result<Json<MonitorGroup>, ApiError> {
    let group = state
        .groups
        .update_group(&user.username, &team, &group, &body.name, &body.description)
        .await?;
    Ok(Json(group))
}

async fn delete_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((team, group)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .groups
        .delete_group(&user.username, &team, &group)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_monitors(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(team): Path<String>,
) -> Result<Json<Vec<Monitor>>, ApiError> {
    Ok(Json(state.monitors.list_monitors(&user.username, &team).await?))
}

/// The raw body is handed to the monitor registry, which reports unknown
/// kinds and malformed documents itself.
async fn create_monitor(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(team): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Monitor>), ApiError> {
    let monitor = state
        .monitors
        .create_monitor(&user.username, &team, &body)
        .await?;
    Ok((StatusCode::CREATED, Json(monitor)))
}

async fn get_monitor(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((team, id)): Path<(String, String)>,
) -> Result<Json<Monitor>, ApiError> {
    Ok(Json(state.monitors.get_monitor(&user.username, &team, &id).await?))
}

async fn update_monitor(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((team, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Monitor>, ApiError> {
    let monitor = state
        .monitors
        .update_monitor(&user.username, &team, &id, &body)
        .await?;
    Ok(Json(monitor))
}

async fn delete_monitor(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((team, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state
        .monitors
        .delete_monitor(&user.username, &team, &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn run_monitor(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path((team, id)): Path<(String, String)>,
) -> Result<Json<MonitorResponse>, ApiError> {
    Ok(Json(state.monitors.run_monitor(&user.username, &team, &id).await?))
}

/// Server-sent stream of the team's monitor events. The subscription only
/// receives this team's events and is released when the client disconnects.
async fn monitor_events(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(team): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let subscription = state.monitors.subscribe(&user.username, &team).await?;

    let events = stream::unfold(subscription, |mut subscription| async move {
        loop {
            let event = subscription.recv().await?;
            match Event::default().event(event.status.as_str()).json_data(&event) {
                Ok(sse) => return Some((Ok(sse), subscription)),
                Err(err) => warn!(monitor_id = %event.id, error = %err, "dropping unserializable event"),
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
