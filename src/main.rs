use std::sync::Arc;

use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use cloudtrail_ingest::callbacks::LoggingRecordsProcessor;
use cloudtrail_ingest::config::Config;
use cloudtrail_ingest::exception::{ExceptionHandler, LoggingExceptionHandler, ProcessingError};
use cloudtrail_ingest::fetch::{LogFetcher, S3ObjectStore, s3_client};
use cloudtrail_ingest::pipeline::SourcePipeline;
use cloudtrail_ingest::progress::{LoggingProgressReporter, ProgressReporter, ProgressStatus};
use cloudtrail_ingest::sqs::SqsManager;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };

    let aws_config = aws_config::load_from_env().await;
    let progress = Arc::new(LoggingProgressReporter);
    let exceptions: Arc<dyn ExceptionHandler> = Arc::new(LoggingExceptionHandler);

    let store = S3ObjectStore::new(s3_client(&aws_config, config.path_style_buckets));
    let fetcher = LogFetcher::new(store, progress.clone(), exceptions.clone());
    let pipeline = Arc::new(
        SourcePipeline::new(fetcher, Arc::new(LoggingRecordsProcessor))
            .with_options(config.pipeline.clone()),
    );

    let sqs = SqsManager::new(
        aws_sdk_sqs::Client::new(&aws_config),
        &config,
        progress.clone(),
        exceptions.clone(),
    );

    tracing::info!("Polling {} for CloudTrail notifications", config.queue_url);

    loop {
        let messages = sqs.poll_queue().await;
        if messages.is_empty() {
            tokio::time::sleep(config.poll_interval()).await;
            continue;
        }

        let handles: Vec<_> = sqs
            .parse_messages(messages)
            .into_iter()
            .map(|mut source| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let outcome = pipeline.process_source(&mut source).await;
                    (source, outcome)
                })
            })
            .collect();

        for handle in handles {
            match handle.await {
                Ok((source, outcome)) => {
                    if outcome.should_delete() {
                        sqs.delete_message(&source, outcome.delete_state()).await;
                    }
                }
                Err(err) => {
                    // message stays on the queue and is redelivered
                    let status = ProgressStatus::exception(err.to_string());
                    let token = progress.report_start(&status);
                    let error = ProcessingError::new(
                        "Uncaught exception while processing source.",
                        status.clone(),
                    )
                    .with_cause(err);
                    exceptions.handle_exception(error);
                    progress.report_end(&status, token);
                }
            }
        }
    }
}
