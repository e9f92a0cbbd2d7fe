use anyhow::Result;
use txflight::config::Config;
use txflight::feed::source_from_config;
use txflight::logging::{log, obj, v_str, v_u64, Domain, Level};
use txflight::runtime::{self, HudSurface};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    cfg.validate()?;

    let source = source_from_config(&cfg)?;
    let max_frames = std::env::var("MAX_FRAMES").ok().and_then(|v| v.parse::<u64>().ok());
    let hud_interval_ms = std::env::var("HUD_INTERVAL_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1_000u64);

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("rpc_url", v_str(&cfg.rpc_url)),
            ("source", v_str(source.name())),
            ("seed", v_u64(cfg.seed)),
            ("max_frames", max_frames.map(v_u64).unwrap_or(serde_json::Value::Null)),
        ]),
    );

    let summary = runtime::run(cfg, source, HudSurface::new(hud_interval_ms), max_frames).await?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
