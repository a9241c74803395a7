//! CLI 모듈
//!
//! ragchat 명령어 정의 및 구현. 모든 명령은 `KnowledgeManager`의 다섯 연산
//! (ingest, list_sources, delete_source, clear, chat)을 호출하고 결과를 출력합니다.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::answer::{AnswerResult, ChatRequest};
use crate::config::{resolve_credential, RagConfig};
use crate::embedding::create_embedder;
use crate::knowledge::{source_metadata, Chunk, ChunkConfig, RetrievalMode, SplitMethod};
use crate::llm::OpenAiCompatibleClient;
use crate::loader::{collect_paths, load_document};
use crate::manager::KnowledgeManager;

/// 대화 루프 종료 단어
const EXIT_WORDS: &[&str] = &["q", "exit", "quit"];

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "ragchat")]
#[command(version, about = "지식베이스 기반 RAG 채팅", long_about = None)]
pub struct Cli {
    /// 데이터 디렉토리 (기본: <data_local_dir>/.ragchat)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// 설정 파일 (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파일, 폴더, 또는 텍스트를 지식베이스에 추가
    Ingest {
        /// 수집할 파일/폴더 경로 (.txt, .md, .pdf)
        paths: Vec<PathBuf>,

        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// --text의 출처 이름
        #[arg(long, default_value = "direct-input")]
        source: String,

        #[command(flatten)]
        chunking: ChunkArgs,

        /// 생성된 청크 미리보기
        #[arg(long)]
        preview: bool,
    },

    /// 출처별 청크 수
    List,

    /// 출처의 모든 청크 삭제
    Delete {
        /// 삭제할 출처 (list에 표시된 그대로)
        source: String,
    },

    /// 지식베이스 전체 초기화
    Clear {
        /// 확인 없이 삭제
        #[arg(long)]
        yes: bool,
    },

    /// 한 번 질문
    Chat {
        /// 질문
        query: String,

        #[command(flatten)]
        options: ChatArgs,

        /// 근거 청크 출력
        #[arg(long)]
        show_sources: bool,

        /// 결과를 JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 대화 모드
    Repl {
        #[command(flatten)]
        options: ChatArgs,
    },

    /// 상태 확인
    Status,
}

/// 청킹 옵션
#[derive(Args, Debug, Clone, Default)]
pub struct ChunkArgs {
    /// 최대 청크 크기 (50-4000)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// 청크 오버랩 (0-500)
    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    /// 분할 방식
    #[arg(long, value_enum)]
    pub method: Option<SplitMethod>,
}

impl ChunkArgs {
    fn apply(&self, base: &ChunkConfig) -> ChunkConfig {
        ChunkConfig {
            chunk_size: self.chunk_size.unwrap_or(base.chunk_size),
            chunk_overlap: self.chunk_overlap.unwrap_or(base.chunk_overlap),
            method: self.method.unwrap_or(base.method),
        }
    }
}

/// 채팅 옵션
#[derive(Args, Debug, Clone, Default)]
pub struct ChatArgs {
    /// 검색 모드
    #[arg(short, long, value_enum)]
    pub mode: Option<RetrievalMode>,

    /// 검색 청크 수
    #[arg(short, long)]
    pub k: Option<usize>,

    /// 모델 이름
    #[arg(long)]
    pub model: Option<String>,

    /// API 베이스 URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// API 키 (없으면 환경변수)
    #[arg(long)]
    pub api_key: Option<String>,
}

impl ChatArgs {
    fn apply(&self, request: &mut ChatRequest) {
        if let Some(mode) = self.mode {
            request.mode = mode;
        }
        if let Some(k) = self.k {
            request.k = k;
        }
        if let Some(ref model) = self.model {
            request.completion.model = model.clone();
        }
        if let Some(ref base_url) = self.base_url {
            request.completion.base_url = base_url.clone();
        }
        if self.api_key.is_some() {
            request.credential = self.api_key.clone();
        }
    }
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RagConfig::load(cli.config.as_deref(), cli.data_dir.as_deref())
        .context("설정 로드 실패")?;

    match cli.command {
        Commands::Ingest {
            paths,
            text,
            source,
            chunking,
            preview,
        } => cmd_ingest(config, paths, text, source, chunking, preview).await,
        Commands::List => cmd_list(config).await,
        Commands::Delete { source } => cmd_delete(config, &source).await,
        Commands::Clear { yes } => cmd_clear(config, yes).await,
        Commands::Chat {
            query,
            options,
            show_sources,
            json,
        } => cmd_chat(config, &query, options, show_sources, json).await,
        Commands::Repl { options } => cmd_repl(config, options).await,
        Commands::Status => cmd_status(config).await,
    }
}

/// 설정으로 관리자 열기
async fn open_manager(config: RagConfig) -> Result<KnowledgeManager> {
    let embedder = create_embedder(&config.embedding).context("임베딩 초기화 실패")?;
    let completion = Arc::new(OpenAiCompatibleClient::new());

    KnowledgeManager::open(config, embedder, completion)
        .await
        .context("지식베이스 열기 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(
    config: RagConfig,
    paths: Vec<PathBuf>,
    text: Option<String>,
    source: String,
    chunking: ChunkArgs,
    preview: bool,
) -> Result<()> {
    if paths.is_empty() && text.is_none() {
        bail!("경로 또는 --text 중 하나를 지정해야 합니다");
    }

    let chunk_config = chunking.apply(&config.chunk);
    chunk_config.validate()?;

    let manager = open_manager(config).await?;

    if let Some(text) = text {
        println!("[*] 텍스트 저장 및 임베딩 생성 중...");
        let chunks = manager
            .ingest(&text, &source_metadata(&source), &chunk_config)
            .await
            .context("문서 추가 실패")?;
        println!("[OK] {} 청크 추가됨 (출처: {})", chunks.len(), source);
        if preview {
            print_chunk_preview(&chunks);
        }
    }

    if paths.is_empty() {
        return Ok(());
    }

    let files = collect_paths(&paths)?;
    if files.is_empty() {
        println!("[!] 수집할 파일이 없습니다.");
        return Ok(());
    }

    println!("[*] 수집 대상: {} 파일", files.len());
    println!(
        "    청크 크기: {}, 오버랩: {}, 방식: {:?}",
        chunk_config.chunk_size, chunk_config.chunk_overlap, chunk_config.method
    );
    println!();

    let (mut success_count, mut error_count) = (0, 0);

    for (i, path) in files.iter().enumerate() {
        print!("[{}/{}] {}... ", i + 1, files.len(), path.display());
        std::io::stdout().flush().ok();

        let documents = match load_document(path).await {
            Ok(d) => d,
            Err(e) => {
                println!("실패: {}", e);
                error_count += 1;
                continue;
            }
        };

        let mut added: Vec<Chunk> = Vec::new();
        let mut failed = false;

        for document in documents {
            match manager
                .ingest(&document.text, &document.metadata, &chunk_config)
                .await
            {
                Ok(chunks) => added.extend(chunks),
                Err(e) => {
                    println!("저장 실패: {:#}", e);
                    failed = true;
                    break;
                }
            }
        }

        if failed {
            error_count += 1;
            continue;
        }

        println!("완료 ({} 청크)", added.len());
        success_count += 1;

        if preview {
            print_chunk_preview(&added);
        }
    }

    println!();
    println!("[OK] 완료: 성공 {}, 실패 {}", success_count, error_count);

    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list(config: RagConfig) -> Result<()> {
    let manager = open_manager(config).await?;
    let sources = manager.list_sources().await.context("목록 조회 실패")?;

    if sources.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", sources.len());
    for summary in sources {
        println!("  {:>5} 청크  {}", summary.count, summary.source);
    }

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(config: RagConfig, source: &str) -> Result<()> {
    let manager = open_manager(config).await?;
    let deleted = manager
        .delete_source(source)
        .await
        .context("문서 삭제 실패")?;

    if deleted > 0 {
        println!("[OK] {} 삭제됨 ({} 청크)", source, deleted);
    } else {
        println!("[!] 출처 '{}'인 청크가 없습니다", source);
    }

    Ok(())
}

/// 초기화 명령어 (clear)
async fn cmd_clear(config: RagConfig, yes: bool) -> Result<()> {
    if !yes {
        bail!("지식베이스 전체가 삭제됩니다. 계속하려면 --yes를 지정하세요");
    }

    let manager = open_manager(config).await?;
    manager.clear().await.context("초기화 실패")?;

    println!("[OK] 지식베이스가 초기화되었습니다");
    Ok(())
}

/// 질문 명령어 (chat)
async fn cmd_chat(
    config: RagConfig,
    query: &str,
    options: ChatArgs,
    show_sources: bool,
    json: bool,
) -> Result<()> {
    let manager = open_manager(config).await?;

    let mut request = manager.request(query);
    options.apply(&mut request);

    let result = manager.chat(&request).await.context("답변 생성 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_answer(&result, show_sources);
    }

    Ok(())
}

/// 대화 모드 (repl)
///
/// 한 프로세스 안에서 추가한 문서는 BM25/Hybrid 검색에도 사용됩니다.
async fn cmd_repl(config: RagConfig, options: ChatArgs) -> Result<()> {
    let chunk_config = config.chunk.clone();
    let manager = open_manager(config).await?;
    let session_id = uuid::Uuid::new_v4().to_string();

    let mut request = manager.request("");
    options.apply(&mut request);

    println!("ragchat v{} - 대화 모드", env!("CARGO_PKG_VERSION"));
    println!("종료: q / exit / quit, 명령어: /help");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("질문> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&line.to_lowercase().as_str()) {
            break;
        }

        if let Some(command) = line.strip_prefix('/') {
            if let Err(e) = repl_command(&manager, &mut request, &chunk_config, command).await {
                println!("[!] 명령 실행 실패");
                println!("{:#}", e);
            }
            continue;
        }

        request.query = line.to_string();
        match manager.chat_in_session(&session_id, &request).await {
            Ok(result) => print_answer(&result, true),
            Err(e) => {
                println!("[!] 답변 생성 실패");
                println!("{:#}", e);
            }
        }
        println!();
    }

    manager.end_session(&session_id)?;
    println!("대화를 종료합니다.");
    Ok(())
}

/// 대화 모드 슬래시 명령
async fn repl_command(
    manager: &KnowledgeManager,
    request: &mut ChatRequest,
    chunk_config: &ChunkConfig,
    command: &str,
) -> Result<()> {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or("");
    let args: Vec<&str> = parts.collect();

    match name {
        "help" => {
            println!("  /ingest <경로...>   문서 추가");
            println!("  /list              출처 목록");
            println!("  /delete <출처>      출처 삭제");
            println!("  /clear             전체 초기화");
            println!("  /mode <vector|bm25|hybrid>");
            println!("  /k <개수>");
        }
        "ingest" => {
            if args.is_empty() {
                bail!("경로를 지정하세요");
            }
            let paths: Vec<PathBuf> = args.iter().map(PathBuf::from).collect();
            for path in collect_paths(&paths)? {
                let mut total = 0;
                for document in load_document(&path).await? {
                    total += manager
                        .ingest(&document.text, &document.metadata, chunk_config)
                        .await?
                        .len();
                }
                println!("[OK] {} ({} 청크)", path.display(), total);
            }
        }
        "list" => {
            for summary in manager.list_sources().await? {
                println!("  {:>5} 청크  {}", summary.count, summary.source);
            }
        }
        "delete" => {
            let source = args.join(" ");
            if source.is_empty() {
                bail!("출처를 지정하세요");
            }
            let deleted = manager.delete_source(&source).await?;
            println!("[OK] {} 삭제됨 ({} 청크)", source, deleted);
        }
        "clear" => {
            manager.clear().await?;
            println!("[OK] 지식베이스가 초기화되었습니다");
        }
        "mode" => {
            let mode: RetrievalMode = args.first().copied().unwrap_or("").parse()?;
            request.mode = mode;
            println!("[OK] 검색 모드: {}", mode);
        }
        "k" => {
            let k: usize = args
                .first()
                .copied()
                .unwrap_or("")
                .parse()
                .context("k는 1 이상의 정수여야 합니다")?;
            if k == 0 {
                bail!("k는 1 이상의 정수여야 합니다");
            }
            request.k = k;
            println!("[OK] k = {}", k);
        }
        other => bail!("알 수 없는 명령: /{}", other),
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: RagConfig) -> Result<()> {
    println!("ragchat v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 모델: {} ({})",
        config.completion.model, config.completion.base_url
    );
    println!(
        "[*] 검색: {} (k={})",
        config.retrieval.mode, config.retrieval.k
    );

    if resolve_credential(None, &config.completion.credential_env).is_some() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!(
            "    설정: export {}=your-key",
            config
                .completion
                .credential_env
                .first()
                .map(String::as_str)
                .unwrap_or("RAGCHAT_API_KEY")
        );
    }

    match open_manager(config).await {
        Ok(manager) => match manager.stats().await {
            Ok(stats) => {
                println!(
                    "[OK] 벡터 인덱스: {} 청크, {} 문서",
                    stats.vector_count, stats.source_count
                );
                println!("     키워드 인덱스: {} 청크 (이번 세션)", stats.lexical_count);
            }
            Err(e) => println!("[!] 통계 조회 실패: {:#}", e),
        },
        Err(e) => println!("[!] 지식베이스 열기 실패: {:#}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 답변 출력
fn print_answer(result: &AnswerResult, show_sources: bool) {
    println!("[{}] {}", result.mode.as_str(), result.answer);

    if show_sources && !result.source_documents.is_empty() {
        println!();
        println!("근거 ({} 건):", result.source_documents.len());
        for (i, chunk) in result.source_documents.iter().enumerate() {
            println!("  {}. {}{}", i + 1, chunk.source(), page_suffix(chunk));
            println!("     {}", truncate_text(&chunk.text, 200));
        }
    }
}

/// 청크 미리보기 출력
fn print_chunk_preview(chunks: &[Chunk]) {
    for (i, chunk) in chunks.iter().enumerate() {
        println!(
            "    #{} [{} chars]{} {}",
            i,
            chunk.text.chars().count(),
            page_suffix(chunk),
            truncate_text(&chunk.text, 80)
        );
    }
}

/// " (p.N)" 페이지 표시
fn page_suffix(chunk: &Chunk) -> String {
    chunk
        .metadata
        .get("page")
        .and_then(|v| v.as_u64())
        .map(|p| format!(" (p.{})", p))
        .unwrap_or_default()
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        assert_eq!(truncate_text(korean, 5), "안녕하세요...");
    }

    #[test]
    fn test_parse_chat_command() {
        let cli = Cli::try_parse_from([
            "ragchat", "--data-dir", "/tmp/kb", "chat", "what is rust?", "--mode", "hybrid", "-k",
            "5", "--json",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/kb")));
        match cli.command {
            Commands::Chat {
                query,
                options,
                json,
                ..
            } => {
                assert_eq!(query, "what is rust?");
                assert_eq!(options.mode, Some(RetrievalMode::Hybrid));
                assert_eq!(options.k, Some(5));
                assert!(json);
            }
            _ => panic!("expected chat command"),
        }
    }

    #[test]
    fn test_parse_ingest_chunk_options() {
        let cli = Cli::try_parse_from([
            "ragchat",
            "ingest",
            "docs/",
            "--chunk-size",
            "800",
            "--method",
            "fixed",
        ])
        .unwrap();

        match cli.command {
            Commands::Ingest {
                paths, chunking, ..
            } => {
                assert_eq!(paths, vec![PathBuf::from("docs/")]);
                let config = chunking.apply(&ChunkConfig::default());
                assert_eq!(config.chunk_size, 800);
                assert_eq!(config.chunk_overlap, 50);
                assert_eq!(config.method, SplitMethod::Fixed);
            }
            _ => panic!("expected ingest command"),
        }
    }

    #[test]
    fn test_chat_args_override_request() {
        let args = ChatArgs {
            mode: Some(RetrievalMode::Bm25),
            api_key: Some("key".to_string()),
            ..Default::default()
        };
        let mut request = ChatRequest::new("q");
        args.apply(&mut request);

        assert_eq!(request.mode, RetrievalMode::Bm25);
        assert_eq!(request.credential.as_deref(), Some("key"));
        assert_eq!(request.k, 3);
    }

    #[test]
    fn test_page_suffix() {
        let mut chunk = Chunk::new("x", source_metadata("a.pdf"));
        assert_eq!(page_suffix(&chunk), "");
        chunk.metadata.insert("page".to_string(), serde_json::Value::from(2));
        assert_eq!(page_suffix(&chunk), " (p.2)");
    }
}
