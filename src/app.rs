use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eframe::egui;
use egui_plot::{HLine, Line, Plot, PlotPoints};

use crate::controller::{CaptureController, SessionView};
use crate::session::Label;

const STRESSED_COLOR: egui::Color32 = egui::Color32::from_rgb(220, 53, 69);
const RELAXED_COLOR: egui::Color32 = egui::Color32::from_rgb(40, 167, 69);
const TREND_COLOR: egui::Color32 = egui::Color32::from_rgb(0, 123, 255);

/// Main window: controls, live preview, result badge, trend chart and log
pub struct StressMonitorApp {
    controller: Arc<CaptureController>,
    texture: Option<egui::TextureHandle>,
    /// Pixels currently uploaded to `texture`
    shown_frame: Option<Arc<Vec<u8>>>,
}

impl StressMonitorApp {
    pub fn new(controller: Arc<CaptureController>) -> Self {
        Self {
            controller,
            texture: None,
            shown_frame: None,
        }
    }

    fn spawn_start(&self) {
        let controller = self.controller.clone();
        let spawned = thread::Builder::new()
            .name("start-monitoring".to_string())
            .spawn(move || {
                if let Err(e) = controller.start() {
                    log::error!("Failed to start monitoring: {:#}", e);
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to start monitoring: {}", e);
        }
    }

    fn spawn_calibration(&self) {
        let controller = self.controller.clone();
        let frames = controller.config().calibration.frames;
        let margin = controller.config().calibration.margin;
        let spawned = thread::Builder::new()
            .name("calibration".to_string())
            .spawn(move || {
                controller.calibrate_baseline(frames, margin);
            });
        if let Err(e) = spawned {
            log::error!("Failed to start calibration: {}", e);
        }
    }

    fn controls(&mut self, ui: &mut egui::Ui, view: &SessionView) {
        ui.horizontal(|ui| {
            let idle = !view.running && !view.starting && !view.calibrating;
            if ui.add_enabled(idle, egui::Button::new("▶ Start")).clicked() {
                self.spawn_start();
            }
            if ui.add_enabled(view.running, egui::Button::new("■ Stop")).clicked() {
                self.controller.stop();
            }
            if ui.add_enabled(idle, egui::Button::new("Calibrate")).clicked() {
                self.spawn_calibration();
            }
            ui.separator();
            ui.label(&view.status);
        });
    }

    fn update_preview(&mut self, ctx: &egui::Context) {
        let Some(frame) = self.controller.preview_frame() else {
            self.texture = None;
            self.shown_frame = None;
            return;
        };
        if self
            .shown_frame
            .as_ref()
            .is_some_and(|shown| Arc::ptr_eq(shown, &frame.rgb))
        {
            return;
        }

        let size = [frame.width as usize, frame.height as usize];
        if frame.rgb.len() < size[0] * size[1] * 3 {
            return;
        }
        let image = egui::ColorImage::from_rgb(size, &frame.rgb[..size[0] * size[1] * 3]);
        match &mut self.texture {
            Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
            None => {
                self.texture =
                    Some(ctx.load_texture("camera_preview", image, egui::TextureOptions::LINEAR))
            }
        }
        self.shown_frame = Some(frame.rgb.clone());
    }

    fn preview(&self, ui: &mut egui::Ui) {
        let Some(texture) = &self.texture else {
            ui.colored_label(egui::Color32::GRAY, "Camera off");
            return;
        };
        let [w, h] = texture.size();
        let display_width = ui.available_width().min(480.0);
        let display_height = display_width * h as f32 / w.max(1) as f32;

        let (rect, _response) = ui.allocate_exact_size(
            egui::vec2(display_width, display_height),
            egui::Sense::hover(),
        );
        ui.painter().image(
            texture.id(),
            rect,
            egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
            egui::Color32::WHITE,
        );
    }

    fn badge(ui: &mut egui::Ui, view: &SessionView) {
        match view.badge {
            Some(prediction) => {
                let color = match prediction.label {
                    Label::Stressed => STRESSED_COLOR,
                    Label::Relaxed => RELAXED_COLOR,
                };
                ui.label(
                    egui::RichText::new(format!(
                        "{} - {:.1}%",
                        prediction.label, prediction.confidence
                    ))
                    .size(28.0)
                    .strong()
                    .color(color),
                );
            }
            None => {
                ui.label(egui::RichText::new("No result yet").size(28.0).weak());
            }
        }
    }

    fn trend_chart(ui: &mut egui::Ui, view: &SessionView) {
        let points: PlotPoints = view
            .trend
            .iter()
            .enumerate()
            .map(|(i, (_, confidence))| [i as f64, *confidence])
            .collect();

        Plot::new("stress_trend")
            .height(220.0)
            .include_y(0.0)
            .include_y(100.0)
            .show_axes([false, true])
            .allow_drag(false)
            .allow_zoom(false)
            .allow_scroll(false)
            .y_axis_label("Stress %")
            .show(ui, |plot_ui| {
                plot_ui.line(
                    Line::new(points)
                        .name("Stress (%)")
                        .color(TREND_COLOR)
                        .fill(0.0),
                );
                plot_ui.hline(
                    HLine::new(view.threshold)
                        .name("Threshold")
                        .color(egui::Color32::GRAY),
                );
            });
    }

    fn alert(&self, ctx: &egui::Context, message: &str) {
        egui::Window::new("Alert")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(message);
                if ui.button("OK").clicked() {
                    self.controller.dismiss_alert();
                }
            });
    }
}

impl eframe::App for StressMonitorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // Ticks and camera frames arrive from other threads
        ctx.request_repaint_after(Duration::from_millis(33));

        let view = self.controller.view();
        self.update_preview(ctx);

        egui::TopBottomPanel::top("controls").show(ctx, |ui| {
            self.controls(ui, &view);
        });

        egui::SidePanel::right("log_panel")
            .default_width(320.0)
            .show(ctx, |ui| {
                ui.heading("Log");
                ui.separator();
                egui::ScrollArea::vertical().show(ui, |ui| {
                    ui.monospace(&view.log);
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.preview(ui);
            ui.add_space(8.0);
            Self::badge(ui, &view);
            if view.calibrated {
                ui.label(format!("Calibrated threshold: {:.1}%", view.threshold));
            }
            ui.add_space(8.0);
            Self::trend_chart(ui, &view);
        });

        if let Some(message) = &view.alert {
            self.alert(ctx, message);
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.controller.stop();
    }
}
