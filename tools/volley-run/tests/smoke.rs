use axum::{Router, routing::post};
use clap::Parser;
use tokio::net::TcpListener;

use volley_run::{Cli, RunConfig, run_once};

#[tokio::test]
async fn dry_run_smoke() {
    let cli = Cli::try_parse_from([
        "volley-run",
        "--url",
        "http://127.0.0.1:1/never",
        "--method",
        "post",
        "--volume",
        "10",
        "--dry-run",
    ])
    .expect("cli parse");

    let config = RunConfig::try_from(cli).expect("config parse");
    let summary = run_once(config).await;

    assert_eq!(summary.planned, 10);
    assert_eq!(summary.attempted, 0);
}

#[tokio::test]
async fn live_run_smoke() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new().route("/echo", post(|body: String| async move { body }));
    tokio::spawn(async move { axum::serve(listener, app).await });

    let url = format!("http://{addr}/echo");
    let cli = Cli::try_parse_from([
        "volley-run",
        "--url",
        url.as_str(),
        "--method",
        "post",
        "--parallelism",
        "2",
        "--volume",
        "6",
        "--body",
        r#"{"k":"v"}"#,
    ])?;
    let summary = run_once(RunConfig::try_from(cli)?).await;

    assert_eq!(summary.attempted, 6);
    assert_eq!(summary.responded, 6);
    Ok(())
}
