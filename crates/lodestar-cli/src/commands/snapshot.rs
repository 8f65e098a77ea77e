use anyhow::anyhow;
use lodestar_sync::Availability;

use super::{Session, settled};
use crate::cli::TargetArgs;
use crate::client::{AppContext, CliError, CliResult};
use crate::output::{render_maindata, render_peers, render_trackers};

pub(crate) async fn handle_snapshot(ctx: &AppContext, args: TargetArgs) -> CliResult<()> {
    let session = Session::start(ctx, &args)?;
    let result = collect(ctx, &session).await;
    session.shutdown();
    result
}

async fn collect(ctx: &AppContext, session: &Session) -> CliResult<()> {
    let maindata = settled(&session.maindata, ctx.settle_timeout).await?;
    if let Availability::Unavailable { reason } = &maindata.availability {
        return Err(CliError::failure(anyhow!("main data unavailable: {reason}")));
    }
    render_maindata(&maindata, ctx.output)?;

    if let Some(peers) = &session.peers {
        render_peers(&settled(peers, ctx.settle_timeout).await?, ctx.output)?;
    }
    if let Some(trackers) = &session.trackers {
        render_trackers(&settled(trackers, ctx.settle_timeout).await?, ctx.output)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;
    use httpmock::prelude::*;
    use lodestar_gateway::DaemonClient;
    use serde_json::json;
    use std::time::Duration;

    const HASH: &str = "8c4adbf9ebe66f1d804fb6a4fb9b74966c3ab609";

    fn context(server: &MockServer) -> AppContext {
        let client = DaemonClient::new(
            server.base_url().parse().expect("valid URL"),
            Duration::from_secs(2),
        )
        .expect("client");
        AppContext {
            client,
            poll_interval: Duration::from_secs(30),
            settle_timeout: Duration::from_secs(5),
            output: OutputFormat::Json,
        }
    }

    #[tokio::test]
    async fn snapshot_renders_each_requested_collection() {
        let server = MockServer::start_async().await;
        let maindata = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v2/sync/maindata");
                then.status(200).json_body(json!({
                    "rid": 1,
                    "full_update": true,
                    "torrents": { HASH: { "name": "debian-12.iso", "state": "uploading" } }
                }));
            })
            .await;
        let peers = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v2/sync/torrentPeers")
                    .query_param("hash", HASH);
                then.status(200).json_body(json!({
                    "rid": 1,
                    "full_update": true,
                    "peers": { "10.0.0.1:51413": { "ip": "10.0.0.1", "port": 51413 } }
                }));
            })
            .await;

        let ctx = context(&server);
        handle_snapshot(
            &ctx,
            TargetArgs {
                peers: Some(HASH.to_string()),
                trackers: None,
            },
        )
        .await
        .expect("snapshot should succeed");
        maindata.assert_async().await;
        peers.assert_async().await;
    }

    #[tokio::test]
    async fn missing_torrent_still_renders_as_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v2/sync/maindata");
                then.status(200).json_body(json!({ "rid": 1, "full_update": true }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v2/torrents/trackers");
                then.status(404);
            })
            .await;

        let ctx = context(&server);
        handle_snapshot(
            &ctx,
            TargetArgs {
                peers: None,
                trackers: Some(HASH.to_string()),
            },
        )
        .await
        .expect("unavailable trackers are rendered, not raised");
    }

    #[tokio::test]
    async fn revoked_session_fails_the_command() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v2/sync/maindata");
                then.status(403);
            })
            .await;

        let ctx = context(&server);
        let err = handle_snapshot(&ctx, TargetArgs::default())
            .await
            .expect_err("forbidden main data should fail");
        assert_eq!(err.exit_code(), 3);
        assert!(err.display_message().contains("main data unavailable"));
    }

    #[tokio::test]
    async fn unreachable_daemon_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v2/sync/maindata");
                then.status(503);
            })
            .await;

        let mut ctx = context(&server);
        ctx.settle_timeout = Duration::from_millis(300);
        let err = handle_snapshot(&ctx, TargetArgs::default())
            .await
            .expect_err("transient failures never settle");
        assert!(err.display_message().contains("did not answer"));
    }
}
