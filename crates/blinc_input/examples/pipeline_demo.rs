//! Input Pipeline Demo
//!
//! Builds a small toolbar tree, registers a few handlers, and drives the
//! background pipeline with a scripted pointer and keyboard session:
//! - hover enter/leave as the pointer crosses buttons
//! - press, release and the tap gesture recognized from them
//! - keyboard input routed to the element focused by the press
//!
//! Run with: RUST_LOG=blinc_input=debug cargo run -p blinc_input --example pipeline_demo

use std::sync::Arc;
use std::time::Duration;

use blinc_core::geometry::Rect;
use blinc_core::tree::{ElementProps, ElementTree};
use blinc_input::{
    EventHandler, InputPipeline, Key, KeyboardEvent, LogVerbosity, LoggingProcessor,
    PipelineConfig, PipelineNotification, PointerEvent, Result, TextInputEvent, Timestamp,
};
use parking_lot::RwLock;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut tree = ElementTree::new();
    let window = tree.create_root(ElementProps::new(Rect::new(0.0, 0.0, 640.0, 480.0)).with_name("window"));
    let toolbar = tree.create_child(
        window,
        ElementProps::new(Rect::new(0.0, 0.0, 640.0, 48.0)).with_name("toolbar"),
    )?;
    let save = tree.create_child(
        toolbar,
        ElementProps::new(Rect::new(8.0, 8.0, 80.0, 32.0)).with_name("save"),
    )?;
    let open = tree.create_child(
        toolbar,
        ElementProps::new(Rect::new(96.0, 8.0, 80.0, 32.0)).with_name("open"),
    )?;

    let tree = Arc::new(RwLock::new(tree));
    let config = PipelineConfig::debug().with_processing_interval(Duration::ZERO);
    let pipeline = InputPipeline::for_element_tree(Arc::clone(&tree), config)?;
    pipeline.add_processor(LoggingProcessor::all(LogVerbosity::Debug));

    let routing = pipeline.routing();
    let builtins = routing.builtins();
    for (element, name) in [(save, "save"), (open, "open")] {
        routing.add_handler(
            element,
            &builtins.pointer_enter,
            EventHandler::pointer(move |_, _| {
                tracing::info!("pointer entered {name}");
                Ok(())
            }),
        )?;
        routing.add_handler(
            element,
            &builtins.pointer_leave,
            EventHandler::pointer(move |_, _| {
                tracing::info!("pointer left {name}");
                Ok(())
            }),
        )?;
        routing.add_handler(
            element,
            &builtins.gesture,
            EventHandler::gesture(move |ctx, gesture| {
                tracing::info!("{:?} on {name}", gesture.kind);
                ctx.set_handled();
                Ok(())
            }),
        )?;
    }
    routing.add_handler(
        toolbar,
        &builtins.key_down,
        EventHandler::keyboard(|ctx, event| {
            tracing::info!(source = ?ctx.source(), "toolbar saw {:?}", event.key);
            Ok(())
        }),
    )?;
    routing.add_handler(
        save,
        &builtins.text_input,
        EventHandler::text(|_, event| {
            tracing::info!("save typed {:?}", event.text);
            Ok(())
        }),
    )?;

    pipeline.subscribe(|notification| match notification {
        PipelineNotification::Unhandled(event) => {
            tracing::info!(kind = ?event.event.kind(), target = ?event.target, "unhandled");
        }
        PipelineNotification::Error(error) => {
            tracing::warn!(stage = %error.stage, "failed: {}", error.error);
        }
        _ => {}
    });

    pipeline.start()?;

    let at = |ms: u64| Timestamp::from_millis(1_000 + ms);
    pipeline.submit_events([
        PointerEvent::moved(300.0, 300.0).with_timestamp(at(0)),
        PointerEvent::moved(40.0, 20.0).with_timestamp(at(16)),
        PointerEvent::down(40.0, 20.0).with_timestamp(at(32)),
        PointerEvent::up(41.0, 21.0).with_timestamp(at(120)),
        PointerEvent::moved(120.0, 20.0).with_timestamp(at(200)),
    ]);
    pipeline.submit_event(KeyboardEvent::pressed(Key::Char('s')).with_timestamp(at(240)));
    pipeline.submit_event(TextInputEvent::new("s").with_timestamp(at(241)));

    if !pipeline.wait_for_drain(Duration::from_secs(2)).await {
        tracing::warn!("pipeline did not drain in time");
    }
    pipeline.shutdown().await?;

    let stats = pipeline.stats();
    tracing::info!(
        submitted = stats.submitted,
        processed = stats.processed,
        errors = stats.errors,
        unhandled = stats.unhandled,
        average = ?stats.average_time,
        hit_tests = stats.hit_test.queries,
        "session finished"
    );
    Ok(())
}
