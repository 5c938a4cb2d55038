mod gui;

use std::sync::Arc;

use eframe::egui;

use fhirscope::persistence::settings::EngineSettings;
use gui::demo::DemoService;
use gui::frontend::ScopeApp;

fn main() -> eframe::Result {
    env_logger::init();
    let settings = EngineSettings::load().unwrap_or_default();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1300.0, 760.0])
            // Provide sensible bounds so the UI stays usable on small screens
            .with_min_inner_size([720.0, 440.0])
            .with_resizable(true),
        ..Default::default()
    };
    eframe::run_native(
        "FHIRScope",
        options,
        Box::new(move |_cc| {
            let service = Arc::new(DemoService::default());
            Ok(Box::new(ScopeApp::new(service, settings)) as Box<dyn eframe::App>)
        }),
    )
}
