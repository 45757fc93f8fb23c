use cardlink::adapters::{
    ConsoleInputProvider, HttpResourceClient, HttpSmsGateway, RecordingGateway, ScriptedInputProvider,
    SimulatedCard, StaticPrescriptions,
};
use cardlink::core::orchestrator::InboundEvent;
use cardlink::domain::model::{Iccsn, ProtocolState, Selection, StepKind, SupplyOption};
use cardlink::domain::ports::{InputProvider, NotificationGateway, ResourceService};
use cardlink::utils::error::ErrorSeverity;
use cardlink::utils::{logger, validation::Validate};
use cardlink::{CardLinkConfig, CliConfig, Notifier, PairingOrchestrator, Session, SessionDriver};
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliConfig::parse();

    let config = match CardLinkConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };

    // 初始化日誌
    if cli.json_logs || config.json_logs() {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting cardlink CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    match run(&cli, &config).await {
        Ok(ProtocolState::Error(reason)) => {
            eprintln!("❌ Pairing failed: {}", reason.describe());
            std::process::exit(2);
        }
        Ok(ProtocolState::Cancelled) => {
            println!("⚠️ Pairing cancelled");
        }
        Ok(_) => {
            println!("✅ Pairing completed successfully!");
        }
        Err(e) => {
            // 記錄詳細錯誤信息
            tracing::error!(
                "❌ Pairing failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            // 根據錯誤嚴重程度決定退出碼
            let exit_code = match e.severity() {
                ErrorSeverity::Low => 0,
                ErrorSeverity::Medium => 2,
                ErrorSeverity::High => 1,
                ErrorSeverity::Critical => 3,
            };

            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}

async fn run(cli: &CliConfig, config: &CardLinkConfig) -> cardlink::Result<ProtocolState> {
    let gateway: Arc<dyn NotificationGateway> = if cli.dry_run {
        tracing::info!("🔍 Dry run: SMS messages are logged, not sent");
        Arc::new(RecordingGateway::new())
    } else {
        Arc::new(HttpSmsGateway::new(&config.gateway)?)
    };
    let notifier = Arc::new(Notifier::new(gateway, config.gateway.sender()));

    let mut session = Session::start(&config.pairing.base_url, config.session_ttl())?;
    println!("🔗 Pairing URL: {}", session.pairing_url());

    // 模擬插入的健保卡
    let iccsns = vec![Iccsn::from_bytes(&[0x80, 0x27, 0x60, 0x01, 0x23, 0x45, 0x67, 0x89, 0x01, 0x23])];

    let prescriptions: Arc<dyn ResourceService> =
        match config.resources.as_ref().and_then(|r| r.endpoint.as_deref()) {
            Some(endpoint) => Arc::new(HttpResourceClient::new(
                endpoint,
                session.token().clone(),
                config.resource_timeout(),
            )?),
            None => Arc::new(StaticPrescriptions::sample(&iccsns)),
        };

    let card = Arc::new(
        SimulatedCard::new()
            .with_code_length(config.code_length())
            .with_prescriptions(prescriptions),
    );
    let orchestrator = Arc::new(PairingOrchestrator::new(
        card.clone(),
        notifier,
        card.clone(),
        config.pairing_settings(),
    ));

    let input: Arc<dyn InputProvider> = if cli.can.is_some() || cli.phone.is_some() || cli.sms_code.is_some() {
        let mut scripted = ScriptedInputProvider::new();
        for (kind, answer) in [
            (StepKind::Can, &cli.can),
            (StepKind::PhoneNumber, &cli.phone),
            (StepKind::SmsCode, &cli.sms_code),
        ] {
            if let Some(answer) = answer {
                scripted = scripted.answer(kind, answer.clone());
            }
        }
        Arc::new(scripted)
    } else {
        Arc::new(ConsoleInputProvider::new())
    };

    let (events, stream) = session.event_channel();
    card.attach(events.clone());
    for event in [
        InboundEvent::CardInsertionRequested,
        InboundEvent::CardDetected { iccsns },
        InboundEvent::CanRequested,
    ] {
        let _ = events.send(event);
    }
    drop(events);

    let driver = SessionDriver::new(orchestrator.clone(), input, config.sms_code_timeout())
        .with_step_timeout(config.step_timeout());
    let mut session = driver.run(session, stream).await;

    println!("📋 {}", session.history_summary());

    if session.state() != &ProtocolState::Authenticated {
        return Ok(session.state().clone());
    }

    let negotiator = orchestrator.negotiator(&session)?;
    let cards = session.card_identifiers().to_vec();
    let listing = negotiator.list_resources(&mut session, &cards).await?;

    for list in &listing.available_prescription_lists {
        println!("💊 Card {}:", list.iccsn);
        for entry in &list.entries {
            println!("   [{}] {}", entry.index, entry.label);
        }

        let confirmation = negotiator
            .select_resources(&mut session, &list.iccsn, &Selection::all(SupplyOption::OnPremise))
            .await?;
        println!(
            "✅ Selection for {} {}",
            confirmation.iccsn,
            if confirmation.accepted { "accepted" } else { "declined" }
        );
    }

    Ok(session.state().clone())
}
