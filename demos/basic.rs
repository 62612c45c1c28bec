//! Minimal bee example: a buffered page with ETags, a form that redirects
//! after a successful POST, and an error handler that logs.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/walks/7
//!   curl -i http://localhost:3000/walks/7 -H 'if-none-match: W/"…"'   # → 304
//!   curl -i http://localhost:3000/walks -d 'name=river&every=1h30m'
//!   curl -i http://localhost:3000/walks -d 'every=soon'               # → 422
//!   curl -i http://localhost:3000/boom                                 # → 500

use std::fmt::Write as _;
use std::io;

use bee::{
    BoxError, Config, Field, FieldKind, Form, HandlerBuilder, Request, ResponseWriter, Router,
    Server,
};
use http::{Method, StatusCode};
use tracing_subscriber::EnvFilter;

struct Env {
    walk_form: Form,
}

#[tokio::main]
async fn main() -> Result<(), bee::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let env = Env {
        walk_form: Form::new(vec![
            Field::new("name", "Name", FieldKind::Text).required(),
            Field::new("every", "Every", FieldKind::Duration).required(),
        ]),
    };

    let hb = HandlerBuilder::with_env(env)
        .param_parser(config.param_parser())
        .error_handler(log_and_render);

    let app = Router::new()
        .on(Method::GET, "/walks/{id}", hb.build(|w, _req, _env, params| {
            Box::pin(async move {
                let id = params.get_str("id").unwrap_or("?");
                write!(w, "<!DOCTYPE html>\n<h1>Walk {id}</h1>")?;
                Ok(())
            })
        }))
        .on(Method::POST, "/walks", hb.build(|w, _req, env, params| {
            Box::pin(async move {
                let data = env.walk_form.parse(params);
                if !data.is_valid() {
                    w.set_status(StatusCode::UNPROCESSABLE_ENTITY);
                    for (name, field) in data.fields() {
                        if let Some(error) = &field.error {
                            writeln!(w, "{name} {error}")?;
                        }
                    }
                    return Ok(());
                }
                tracing::info!(name = params.get_str("name"), "walk created");
                w.redirect("/walks/1", StatusCode::SEE_OTHER)?;
                Ok(())
            })
        }))
        .on(Method::GET, "/boom", hb.build(|w, _req, _env, _params| {
            Box::pin(async move {
                w.write(b"this never reaches the client");
                Err(io::Error::other("boom").into())
            })
        }));

    Server::from_config(&config).serve(app).await
}

fn log_and_render(w: &mut ResponseWriter, req: &Request, err: &BoxError) -> Result<bool, BoxError> {
    tracing::error!(path = req.path(), error = %err, "request failed");
    w.error(StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong");
    Ok(true)
}
