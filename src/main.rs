use std::process::{self, ExitCode};

use clap::Parser;
use colored::Colorize;
use log::warn;

use rsubrecon::input::{Method, Opts};
use rsubrecon::logger::init_logger;
use rsubrecon::{CrtShSummary, DomainReport, ReconEngine, ReconError, RunSummary};

#[tokio::main]
async fn main() -> ExitCode {
    let opts = Opts::parse();
    init_logger(opts.log_level());

    let method = opts.method;
    let engine = match ReconEngine::new(opts.into_config()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{} {}", "[-]".red(), e);
            return ExitCode::FAILURE;
        }
    };

    // 第一次 Ctrl-C: 停止发起新的探测，已完成的结果照常保存；第二次: 立即退出
    let running = engine.running();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("收到中断信号，停止发起新的探测并保存已完成的结果 (再次 Ctrl-C 立即退出)");
        running.stop();

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{} 强制退出，结果未保存", "[-]".red());
            process::exit(130);
        }
    });

    let task = tokio::spawn(async move {
        match method {
            Method::Wordlist => engine.run_wordlist().await.map(|summary| print_run_summary(&summary)),
            Method::Crtsh => {
                println!("{} 开始被动侦察 (crt.sh)", "[*]".blue());
                engine
                    .run_crtsh(print_report)
                    .await
                    .map(|summary| print_crtsh_summary(&summary))
            }
        }
    });

    match task.await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            print_error(&e);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{} 运行异常终止: {}", "[-]".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_error(e: &ReconError) {
    if e.is_configuration() {
        eprintln!("{} 配置错误: {}", "[-]".red(), e);
    } else {
        eprintln!("{} {}", "[-]".red(), e);
    }
}

/// 每完成一个域名立即打印
fn print_report(domain: &str, report: &DomainReport) {
    match report.error() {
        Some(error) => println!("{} {}: {}", "✗".red(), domain, error),
        None => println!(
            "{} {}: {} 个子域名, {} 张证书",
            "✓".green(),
            domain,
            report.subdomains().len(),
            report.certificate_count()
        ),
    }
}

fn print_crtsh_summary(summary: &CrtShSummary) {
    if summary.interrupted {
        println!("{} 已被用户中断", "[!]".yellow());
    }
    println!(
        "{} {} 个域名, {} 个失败, 共 {} 个子域名",
        "[+]".green(),
        summary.reports.len(),
        summary.failed(),
        summary.subdomain_count()
    );
    println!("{} 结果已保存到 {}", "[+]".green(), summary.saved.json.display());
    if let Some(ref csv) = summary.saved.csv {
        println!("{} CSV已保存到 {}", "[+]".green(), csv.display());
    }
}

fn print_run_summary(summary: &RunSummary) {
    if summary.interrupted {
        println!("{} 已被用户中断", "[!]".yellow());
    }
    println!(
        "{} 候选 {} 个, 已验证 {} 个, 存活 {} 个",
        "[+]".green(),
        summary.candidates,
        summary.validated,
        summary.live
    );
    for record in &summary.records {
        let ips: Vec<String> = record.resolved_addresses.iter().map(|ip| ip.to_string()).collect();
        println!("  {} [{}]", record.host.cyan(), ips.join(", "));
        for banner in record.banners.iter().filter(|b| !b.text.is_empty()) {
            println!("    {}:{} {}", banner.address, banner.port, banner.text.dimmed());
        }
    }
    println!("{} 结果已保存到 {}", "[+]".green(), summary.saved.json.display());
    if let Some(ref csv) = summary.saved.csv {
        println!("{} CSV已保存到 {}", "[+]".green(), csv.display());
    }
}
