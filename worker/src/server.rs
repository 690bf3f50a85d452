use crate::download;
use crate::slave::{Refusal, Slave};
use crate::web::{self, refused};
use actix_web::http::StatusCode;
use actix_web::{get, post, web as aw, HttpResponse, Responder};
use buildmaster_common::api::slave::{DoYouHaveRequest, SlaveInfo, StartBuildRequest};
use buildmaster_common::api::PROTOCOL_VERSION;
use buildmaster_common::errors::*;
use buildmaster_common::utils;

const METHODS: &[&str] = &[
    "echo",
    "info",
    "doyouhave",
    "storefile",
    "startbuild",
    "status",
    "fetchlogtail",
    "fetchfile",
    "clean",
];

fn refusal_status(refusal: &Refusal) -> StatusCode {
    match refusal {
        Refusal::Busy(_) => StatusCode::CONFLICT,
        Refusal::MissingFile(_) | Refusal::InvalidFilename(_) => StatusCode::BAD_REQUEST,
    }
}

#[post("/rpc/echo")]
pub async fn echo(args: aw::Json<Vec<String>>) -> impl Responder {
    aw::Json(args.into_inner())
}

#[get("/rpc/info")]
pub async fn info(slave: aw::Data<Slave>) -> impl Responder {
    aw::Json(SlaveInfo {
        protocol_version: PROTOCOL_VERSION.to_string(),
        methods: METHODS.iter().map(|m| m.to_string()).collect(),
        arch_tag: slave.config().arch_tag.clone(),
        mechanisms: vec!["chroot".to_string()],
    })
}

#[post("/rpc/doyouhave")]
pub async fn do_you_have(
    req: aw::Json<DoYouHaveRequest>,
    slave: aw::Data<Slave>,
) -> web::Result<HttpResponse> {
    let req = req.into_inner();
    if !utils::is_sha1_hex(&req.sha1) {
        return Ok(refused(StatusCode::BAD_REQUEST, format!("invalid sha1: {:?}", req.sha1)));
    }

    let cache = slave.cache();
    if cache.has(&req.sha1).await? {
        return Ok(HttpResponse::Ok().json(true));
    }

    let Some(url) = req.url else {
        return Ok(HttpResponse::Ok().json(false));
    };

    let have = match download::download(&url, &req.sha1, slave.config().max_bytes).await {
        Ok(content) => {
            cache.store(&content).await?;
            true
        }
        Err(err) => {
            warn!("Failed to download {:?}: {:#}", url, err);
            false
        }
    };
    Ok(HttpResponse::Ok().json(have))
}

pub async fn store_file(body: aw::Bytes, slave: aw::Data<Slave>) -> web::Result<HttpResponse> {
    let sha1 = slave.cache().store(&body).await?;
    Ok(HttpResponse::Ok().json(sha1))
}

#[post("/rpc/startbuild")]
pub async fn start_build(
    req: aw::Json<StartBuildRequest>,
    slave: aw::Data<Slave>,
) -> web::Result<HttpResponse> {
    let slave = slave.into_inner();
    match slave.start_build(req.into_inner()).await? {
        Ok(()) => Ok(HttpResponse::Ok().json(true)),
        Err(refusal) => Ok(refused(refusal_status(&refusal), refusal)),
    }
}

#[get("/rpc/status")]
pub async fn status(slave: aw::Data<Slave>) -> impl Responder {
    aw::Json(slave.status())
}

#[get("/rpc/fetchlogtail")]
pub async fn fetch_log_tail(slave: aw::Data<Slave>) -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(slave.log_tail())
}

#[get("/filecache/{sha1}")]
pub async fn fetch_file(sha1: aw::Path<String>, slave: aw::Data<Slave>) -> web::Result<HttpResponse> {
    let sha1 = sha1.into_inner();
    if !utils::is_sha1_hex(&sha1) {
        return Ok(HttpResponse::NotFound().finish());
    }
    match slave.cache().get(&sha1).await? {
        Some(content) => Ok(HttpResponse::Ok()
            .content_type("application/octet-stream")
            .body(content)),
        None => Ok(HttpResponse::NotFound().finish()),
    }
}

#[post("/rpc/clean")]
pub async fn clean(slave: aw::Data<Slave>) -> web::Result<HttpResponse> {
    match slave.clean().await? {
        Ok(()) => Ok(HttpResponse::Ok().json(true)),
        Err(refusal) => Ok(refused(refusal_status(&refusal), refusal)),
    }
}

pub fn routes(cfg: &mut aw::ServiceConfig, max_bytes: usize) {
    cfg.service(echo)
        .service(info)
        .service(do_you_have)
        .service(
            aw::resource("/rpc/storefile")
                .app_data(aw::PayloadConfig::new(max_bytes))
                .route(aw::post().to(store_file)),
        )
        .service(start_build)
        .service(status)
        .service(fetch_log_tail)
        .service(fetch_file)
        .service(clean);
}
