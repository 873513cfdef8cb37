use std::sync::{Mutex, mpsc};

use bevy::prelude::*;
use bevy_egui::{EguiContexts, EguiPlugin, egui};

use crate::machine::Warning;
use crate::parser::parse;
use crate::presets::PRESET_COUNT;
use crate::runner::{Event, MAX_STEP_DELAY_MS, Session, SessionError, Snapshot};

/// Bevy resource owning the session driven by the UI.
#[derive(Resource)]
struct SessionHandle(Session);

/// Bevy resource wrapping the event channel receiver (Mutex for Sync).
#[derive(Resource)]
struct EventReceiver(Mutex<mpsc::Receiver<Event>>);

/// Bevy resource for what the window shows and the editable inputs.
#[derive(Resource, Default)]
struct ViewState {
    snapshot: Snapshot,
    /// Unacknowledged warning, shown as a modal until dismissed.
    warning: Option<(usize, Warning)>,
    error: Option<String>,
    message: String,
    program: String,
    delay_ms: u64,
}

impl ViewState {
    fn pull_inputs(&mut self, session: &Session) {
        self.message = session.message().to_string();
        self.program = session.program_text();
        self.delay_ms = session.step_delay().as_millis() as u64;
    }

    fn report(&mut self, result: Result<(), SessionError>) {
        self.error = result.err().map(|e| e.to_string());
    }

    /// A warning belongs to the run that raised it.
    fn start_run(&mut self, session: &Session) {
        self.warning = None;
        session.run();
    }

    fn reset(&mut self, session: &Session) {
        self.warning = None;
        session.reset();
    }
}

/// Launch the live visualization.
pub fn run_viz(session: Session, events: mpsc::Receiver<Event>) {
    let mut view = ViewState {
        snapshot: session.snapshot(),
        ..Default::default()
    };
    view.pull_inputs(&session);

    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "Hexstep".into(),
                resolution: (1280., 800.).into(),
                ..default()
            }),
            ..default()
        }))
        .add_plugins(EguiPlugin)
        .insert_resource(SessionHandle(session))
        .insert_resource(EventReceiver(Mutex::new(events)))
        .insert_resource(view)
        .add_systems(Update, drain_events)
        .add_systems(Update, render_ui.after(drain_events))
        .run();
}

/// System: drain session events each frame.
fn drain_events(receiver: Res<EventReceiver>, mut view: ResMut<ViewState>) {
    let rx = receiver.0.lock().unwrap_or_else(|e| e.into_inner());
    while let Ok(event) = rx.try_recv() {
        match event {
            Event::Snapshot(snap) => view.snapshot = snap,
            Event::Warning { index, warning } => view.warning = Some((index, warning)),
            Event::Finished(_) => {}
        }
    }
}

/// System: render egui panels and controls.
fn render_ui(mut contexts: EguiContexts, session: Res<SessionHandle>, mut view: ResMut<ViewState>) {
    let ctx = contexts.ctx_mut();
    let session = &session.0;
    let view = &mut *view;
    let running = view.snapshot.running;

    egui::SidePanel::left("controls").min_width(280.0).show(ctx, |ui| {
        ui.heading("Control Panel");
        ui.add_space(8.0);

        ui.label("Message:");
        if ui
            .add_enabled(!running, egui::TextEdit::singleline(&mut view.message))
            .changed()
        {
            view.message = view.message.to_uppercase();
            view.report(session.set_message(&view.message));
        }

        ui.label("Code (space separated):");
        if ui
            .add_enabled(!running, egui::TextEdit::multiline(&mut view.program).code_editor())
            .changed()
        {
            view.report(session.set_program(&view.program));
        }

        ui.label(format!("Speed: {}ms", view.delay_ms));
        if ui
            .add_enabled(
                !running,
                egui::Slider::new(&mut view.delay_ms, 0..=MAX_STEP_DELAY_MS).step_by(10.0),
            )
            .changed()
        {
            view.report(session.set_step_delay(view.delay_ms));
        }

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            if ui.add_enabled(!running, egui::Button::new("Run")).clicked() {
                view.start_run(session);
            }
            if ui.button("Reset").clicked() {
                view.reset(session);
            }
        });

        ui.add_space(8.0);
        ui.label("Examples:");
        ui.horizontal(|ui| {
            for i in 1..=PRESET_COUNT {
                if ui.button(format!("Ex. {i}")).clicked() {
                    view.warning = None;
                    view.report(session.load_example(i));
                    view.pull_inputs(session);
                }
            }
        });

        if let Some(err) = &view.error {
            ui.add_space(8.0);
            ui.colored_label(egui::Color32::LIGHT_RED, err);
        }

        ui.add_space(16.0);
        ui.heading("Reference");
        egui::Grid::new("reference").striped(true).show(ui, |ui| {
            for e in session.catalog().entries() {
                ui.monospace(e.opcode.to_string());
                ui.label(e.name);
                ui.label(e.label).on_hover_text(e.description);
                ui.end_row();
            }
        });
    });

    egui::CentralPanel::default().show(ctx, |ui| {
        let snap = &view.snapshot;

        ui.heading("Current State");
        ui.horizontal(|ui| {
            for (idx, letter) in session.message().chars().iter().enumerate() {
                let text = egui::RichText::new(letter.to_string()).monospace().size(24.0);
                if idx == snap.pointer {
                    ui.label(text.strong().color(egui::Color32::YELLOW));
                } else {
                    ui.label(text);
                }
            }
        });
        ui.label(format!("Pointer at position: {}", snap.pointer));
        let buffer = if snap.buffer.is_empty() { "empty" } else { snap.buffer.as_str() };
        ui.label(format!("Buffer: {buffer}"));

        ui.add_space(8.0);
        ui.label("Board (output):");
        if snap.output.is_empty() {
            ui.weak("No output");
        }
        for line in &snap.output {
            ui.monospace(line);
        }

        ui.add_space(16.0);
        ui.columns(2, |cols| {
            cols[0].heading("Loaded Program");
            egui::ScrollArea::vertical().id_salt("program").show(&mut cols[0], |ui| {
                for (idx, token) in parse(&view.program).iter().enumerate() {
                    let desc = match session.catalog().lookup(token) {
                        Some(e) => format!("{} - {}", e.name, e.description),
                        None => session.catalog().unknown_label().to_string(),
                    };
                    let text = egui::RichText::new(format!("{idx:02} {} {desc}", token.to_uppercase()))
                        .monospace();
                    if snap.current == Some(idx) {
                        ui.label(text.color(egui::Color32::YELLOW));
                    } else {
                        ui.label(text);
                    }
                }
            });

            cols[1].heading("Execution History");
            egui::ScrollArea::vertical()
                .id_salt("history")
                .stick_to_bottom(true)
                .show(&mut cols[1], |ui| {
                    if snap.history.is_empty() {
                        ui.weak("No history yet...");
                    }
                    for line in &snap.history {
                        ui.monospace(line);
                    }
                });
        });
    });

    let mut dismissed = false;
    if let Some((index, warning)) = &view.warning {
        egui::Window::new("Warning")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(format!("Instruction {index}: {warning}"));
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
    }
    if dismissed {
        view.warning = None;
    }
}
