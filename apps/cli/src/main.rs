use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use widgetchat_core_sdk::{
    config::{self, RelayConfig},
    keypool::KeyPool,
    llm,
    models::Turn,
    server::{self, AppState},
    telemetry,
};

/**
 * \brief CLI 程序入口：聊天控件的后端中继。
 */
#[derive(Parser, Debug)]
#[command(name = "widgetchat", version, about = "WidgetChat relay backend")]
struct Cli {
    /** \brief 密钥配置文件路径（JSON：{ "apiKeys": [...] }）。 */
    #[arg(long, global = true, default_value = "config/keys.json")]
    keys: PathBuf,

    /** \brief 知识库文本文件路径，可缺失。 */
    #[arg(long, global = true, default_value = "knowledge_base.txt")]
    knowledge: PathBuf,

    /** \brief 上游 API 基地址。 */
    #[arg(long, global = true, default_value = config::DEFAULT_API_BASE)]
    api_base: String,

    /** \brief 生成模型名。 */
    #[arg(long, global = true, default_value = config::DEFAULT_MODEL)]
    model: String,

    /** \brief 开启文件遥测日志（logs/widgetchat.log）。 */
    #[arg(long, global = true, default_value_t = false)]
    enable_telemetry: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 启动中继服务并提供静态控件页面。
     */
    Serve {
        #[arg(long, default_value = "0.0.0.0:3000")]
        addr: String,
    },

    /**
     * \brief 发送一条消息做手工探测，打印模型回复文本。
     */
    Ask {
        #[arg(long)]
        prompt: String,
        /** \brief 打印完整响应信封而不是提取的文本。 */
        #[arg(long, default_value_t = false)]
        raw: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::set_enabled(cli.enable_telemetry);

    let keys = config::load_keys(&cli.keys);
    let knowledge = config::load_knowledge_base(&cli.knowledge);
    let cfg = RelayConfig {
        api_base: cli.api_base,
        model: cli.model,
    };
    let state = AppState::new(cfg, KeyPool::new(keys), knowledge);

    match cli.command {
        Commands::Serve { addr } => {
            telemetry::log_event(
                "cli.serve",
                &format!("addr={} keys={} model={}", addr, state.pool.len(), state.cfg.model),
            );
            server::run(&addr, state).await?;
        }
        Commands::Ask { prompt, raw } => {
            let envelope = llm::generate(
                &state.client,
                &state.cfg,
                &state.pool,
                state.knowledge.as_deref(),
                &[Turn::user(prompt)],
            )
            .await
            .context("relay request failed")?;
            if raw {
                println!("{:#}", envelope);
            } else {
                println!("{}", llm::extract_text(&envelope));
            }
        }
    }

    Ok(())
}
