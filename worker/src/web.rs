use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use buildmaster_common::errors;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    err: errors::Error,
}

pub type Result<T> = ::std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        write!(w, "{:#}", self.err)
    }
}

impl actix_web::error::ResponseError for Error {}

impl From<errors::Error> for Error {
    fn from(err: errors::Error) -> Error {
        errors::error!("Error occurred in http handler: {err:#}");
        Error { err }
    }
}

/// Reply for a request the builder refuses to act on.
pub fn refused(status: StatusCode, reason: impl fmt::Display) -> HttpResponse {
    errors::warn!("Refusing request: {}", reason);
    HttpResponse::build(status).body(reason.to_string())
}
