//! ragchat CLI 진입점

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    // 로깅 초기화
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // CLI 실행
    let cli = ragchat::cli::Cli::parse();

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(ragchat::cli::run(cli));

    if let Err(e) = result {
        eprintln!("[!] 요청을 처리하지 못했습니다.");
        eprintln!("{:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
