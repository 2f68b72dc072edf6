//! # API Server
//!
//! The HTTP control surface. Handlers validate parameters and motor
//! state, then call the motor's admission methods; blocking admissions
//! (`block=true` moves, homing) run on the blocking thread pool so the
//! async executor is never held hostage by a motion in progress.
//!
//! Parameter faults return 400, state faults 500, and admission verdicts
//! come back as plain result strings — callers are other lab software,
//! not browsers.

use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use serde::Deserialize;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use std::sync::Arc;

use crate::motor::Motor;
use crate::state::{AppContext, Direction, MotorState};
use motion::Kinematics;

/// The application state shared across all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
    pub shutdown: Sender<()>,
}

#[derive(Debug, Deserialize)]
struct MoveRequest {
    uuid: String,
    dir: u8,
    steps: i64,
    #[serde(default)]
    block: bool,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
struct EnableRequest {
    uuid: String,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
struct MotorRequest {
    uuid: String,
}

#[derive(Debug, Deserialize, Default)]
struct StopRequest {
    uuid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HomeRequest {
    uuid: String,
    dir: u8,
}

#[derive(Debug, Deserialize)]
struct MotionConfigRequest {
    uuid: String,
    jerk: Option<f64>,
    vel: Option<f64>,
    acc: Option<f64>,
}

fn lookup<'a>(ctx: &'a AppContext, uuid: &str) -> Result<&'a Arc<Motor>, HttpResponse> {
    ctx.registry.get(uuid).ok_or_else(|| {
        warn!(uuid, "nonexistent motor uuid specified");
        HttpResponse::BadRequest().body("Nonexistent motor uuid specified!")
    })
}

fn bad_state(motor: &Motor) -> HttpResponse {
    HttpResponse::InternalServerError()
        .body(format!("Motor {} in bad state {:?}", motor.uuid(), motor.state()))
}

/// Status snapshots for every motor, keyed by uuid.
#[get("/motors/")]
async fn all_motors(data: web::Data<AppState>) -> impl Responder {
    let mut results = serde_json::Map::new();
    for motor in data.ctx.registry.iter() {
        results.insert(
            motor.uuid().to_string(),
            serde_json::to_value(motor.dump_state()).unwrap_or(serde_json::Value::Null),
        );
    }
    HttpResponse::Ok().json(results)
}

/// Status snapshot for one motor.
#[get("/motors/{uuid}/")]
async fn one_motor(path: web::Path<String>, data: web::Data<AppState>) -> impl Responder {
    match data.ctx.registry.get(&path) {
        Some(motor) => {
            let mut result = serde_json::Map::new();
            result.insert(
                motor.uuid().to_string(),
                serde_json::to_value(motor.dump_state()).unwrap_or(serde_json::Value::Null),
            );
            HttpResponse::Ok().json(result)
        }
        None => HttpResponse::BadRequest().body("Motor UUID not found"),
    }
}

#[post("/move/")]
async fn move_motor(
    body: web::Json<MoveRequest>,
    data: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let req = body.into_inner();
    debug!(?req, "incoming move command");
    let motor = match lookup(&data.ctx, &req.uuid) {
        Ok(m) => m.clone(),
        Err(resp) => return Ok(resp),
    };
    let Some(dir) = Direction::from_bit(req.dir) else {
        return Ok(HttpResponse::BadRequest().body("Invalid move parameters specified!"));
    };
    if !(0..1_000_000).contains(&req.steps) {
        return Ok(HttpResponse::BadRequest().body("Invalid move parameters specified!"));
    }
    let state = motor.state();
    info!(
        uuid = %motor.uuid(),
        steps = req.steps,
        dir = req.dir,
        ?state,
        "move ordered"
    );
    if !matches!(state, MotorState::Idle | MotorState::Moving) {
        return Ok(bad_state(&motor));
    }

    let steps = req.steps as u32;
    let result = web::block(move || motor.command_move(dir, steps, req.block, req.force))
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    Ok(HttpResponse::Ok().body(result.as_str()))
}

#[post("/enable/")]
async fn enable_motor(
    body: web::Json<EnableRequest>,
    data: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let req = body.into_inner();
    debug!(?req, "incoming enable command");
    let motor = match lookup(&data.ctx, &req.uuid) {
        Ok(m) => m.clone(),
        Err(resp) => return Ok(resp),
    };
    info!(uuid = %motor.uuid(), state = ?motor.state(), "enable ordered");
    if motor.state() != MotorState::Disabled {
        return Ok(bad_state(&motor));
    }
    Ok(HttpResponse::Ok().body(motor.enable(req.force).as_str()))
}

#[post("/disable/")]
async fn disable_motor(
    body: web::Json<MotorRequest>,
    data: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let req = body.into_inner();
    debug!(?req, "incoming disable command");
    let motor = match lookup(&data.ctx, &req.uuid) {
        Ok(m) => m.clone(),
        Err(resp) => return Ok(resp),
    };
    info!(uuid = %motor.uuid(), state = ?motor.state(), "disable ordered");
    if motor.state() != MotorState::Idle {
        return Ok(bad_state(&motor));
    }
    Ok(HttpResponse::Ok().body(motor.disable().as_str()))
}

#[post("/home/")]
async fn home_motor(
    body: web::Json<HomeRequest>,
    data: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let req = body.into_inner();
    debug!(?req, "incoming home command");
    let motor = match lookup(&data.ctx, &req.uuid) {
        Ok(m) => m.clone(),
        Err(resp) => return Ok(resp),
    };
    let Some(dir) = Direction::from_bit(req.dir) else {
        return Ok(HttpResponse::BadRequest().body("Invalid home parameters specified!"));
    };
    info!(uuid = %motor.uuid(), dir = req.dir, "homing ordered");
    if motor.state() != MotorState::Idle {
        return Ok(bad_state(&motor));
    }
    let result = web::block(move || motor.home(dir))
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    Ok(HttpResponse::Ok().body(result.as_str()))
}

/// Stops current and queued actions; with no uuid, stops every motor.
#[post("/stop/")]
async fn stop_motors(
    body: Option<web::Json<StopRequest>>,
    data: web::Data<AppState>,
) -> impl Responder {
    let req = body.map(|b| b.into_inner()).unwrap_or_default();
    info!(?req, "incoming stop command");

    let targets: Vec<Arc<Motor>> = match &req.uuid {
        Some(uuid) => match data.ctx.registry.get(uuid) {
            Some(motor) => vec![motor.clone()],
            None => {
                return HttpResponse::BadRequest().body("Nonexistent motor uuid specified!");
            }
        },
        None => data.ctx.registry.iter().cloned().collect(),
    };

    let mut results = serde_json::Map::new();
    for motor in targets {
        let outcome = match motor.state() {
            MotorState::Uninitialized => "Failed, uninitialized!".to_string(),
            MotorState::Idle => "Failed, already idle!".to_string(),
            MotorState::Disabled => "Failed, already disabled!".to_string(),
            _ => {
                if motor.stop() {
                    "OK".to_string()
                } else {
                    "FAIL".to_string()
                }
            }
        };
        results.insert(motor.uuid().to_string(), serde_json::Value::String(outcome));
    }
    HttpResponse::Ok().json(results)
}

/// Updates a motor's kinematic limits while it is IDLE or DISABLED.
#[post("/config/motion")]
async fn config_motion(
    body: web::Json<MotionConfigRequest>,
    data: web::Data<AppState>,
) -> impl Responder {
    let req = body.into_inner();
    debug!(?req, "motion config command");
    let motor = match lookup(&data.ctx, &req.uuid) {
        Ok(m) => m.clone(),
        Err(resp) => return resp,
    };

    let current = motor.kinematics();
    let jerk = req.jerk.unwrap_or(current.jerk);
    if !(0.0..=10_000.0).contains(&jerk) {
        return HttpResponse::BadRequest().body("Bad jerk parameter specified");
    }
    let vel = req.vel.unwrap_or(current.velocity);
    if !(vel > 0.0 && vel <= 10_000.0) {
        return HttpResponse::BadRequest().body("Bad vel parameter specified");
    }
    let acc = req.acc.unwrap_or(current.acceleration);
    if !(acc > 0.0 && acc <= 10_000.0) {
        return HttpResponse::BadRequest().body("Bad acc parameter specified");
    }

    info!(uuid = %motor.uuid(), jerk, vel, acc, "motion parameter change");
    if !matches!(motor.state(), MotorState::Idle | MotorState::Disabled) {
        return bad_state(&motor);
    }
    if motor.update_kinematics(Kinematics { jerk, velocity: vel, acceleration: acc }) {
        HttpResponse::Ok().body("OK")
    } else {
        bad_state(&motor)
    }
}

/// Serves the raw config document as loaded at startup.
#[get("/config/")]
async fn dump_config(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(&data.ctx.raw_config)
}

/// Graceful shutdown of the whole process.
#[post("/shutdown/")]
async fn shutdown(data: web::Data<AppState>) -> impl Responder {
    info!("shutdown requested over HTTP");
    let _ = data.shutdown.send(()).await;
    HttpResponse::Ok().body("Goodbye...")
}

/// Mounts every route; shared between the real server and test harnesses.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(all_motors)
        .service(one_motor)
        .service(move_motor)
        .service(enable_motor)
        .service(disable_motor)
        .service(home_motor)
        .service(stop_motors)
        .service(config_motion)
        .service(dump_config)
        .service(shutdown);
}

/// Starts the Actix web server.
pub fn start_api_server(port: u16, app_state: AppState) -> std::io::Result<actix_web::dev::Server> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .configure(configure)
    })
    .bind(("0.0.0.0", port))?
    .run();
    Ok(server)
}
