//! "User Details" window asking for name and seat.

use crate::credentials::{CredentialSource, Credentials};
use std::cell::RefCell;
use std::rc::Rc;

const MISSING_FIELDS: &str = "Please enter both Name and Seat No.";

/// Interactive source. Closing the window without submitting cancels.
pub struct FormCredentials;

impl FormCredentials {
    pub fn new() -> Self {
        Self
    }
}

impl CredentialSource for FormCredentials {
    fn get_name_and_seat(&mut self) -> anyhow::Result<Option<Credentials>> {
        let outcome = Rc::new(RefCell::new(None));

        let options = eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([340.0, 170.0])
                .with_resizable(false)
                .with_title("User Details"),
            ..Default::default()
        };

        let app_outcome = Rc::clone(&outcome);
        eframe::run_native(
            "User Details",
            options,
            Box::new(move |_cc| Ok(Box::new(DetailsForm::new(app_outcome)))),
        )
        .map_err(|e| anyhow::anyhow!("details form failed: {}", e))?;

        let submitted = outcome.borrow_mut().take();
        if submitted.is_none() {
            tracing::info!("details form closed without submitting");
        }
        Ok(submitted)
    }
}

struct DetailsForm {
    name: String,
    seat: String,
    show_warning: bool,
    outcome: Rc<RefCell<Option<Credentials>>>,
}

impl DetailsForm {
    fn new(outcome: Rc<RefCell<Option<Credentials>>>) -> Self {
        Self {
            name: String::new(),
            seat: String::new(),
            show_warning: false,
            outcome,
        }
    }
}

impl eframe::App for DetailsForm {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Grid::new("details")
                .num_columns(2)
                .spacing([8.0, 8.0])
                .show(ui, |ui| {
                    ui.label("Name");
                    ui.text_edit_singleline(&mut self.name);
                    ui.end_row();

                    ui.label("Seat No.");
                    ui.text_edit_singleline(&mut self.seat);
                    ui.end_row();
                });

            ui.add_space(8.0);

            let mut pressed = None;
            ui.horizontal(|ui| {
                if ui.button("Start (Temporary)").clicked() {
                    pressed = Some(false);
                }
                if ui.button("Permanent").clicked() {
                    pressed = Some(true);
                }
            });

            if self.show_warning {
                ui.colored_label(egui::Color32::from_rgb(200, 60, 60), MISSING_FIELDS);
            }

            if let Some(persist) = pressed {
                match submission(&self.name, &self.seat, persist) {
                    Some(creds) => {
                        *self.outcome.borrow_mut() = Some(creds);
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                    None => self.show_warning = true,
                }
            }
        });
    }
}

/// Trimmed credentials, or `None` when either field is blank.
fn submission(name: &str, seat: &str, persist: bool) -> Option<Credentials> {
    let name = name.trim();
    let seat = seat.trim();
    if name.is_empty() || seat.is_empty() {
        return None;
    }
    Some(Credentials {
        name: name.to_string(),
        seat: seat.to_string(),
        persist,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_requires_both_fields() {
        assert!(submission("", "12A", false).is_none());
        assert!(submission("Jane", "  ", true).is_none());
    }

    #[test]
    fn test_submission_trims_and_carries_persist() {
        let creds = submission(" Jane Doe ", "12A\t", true).unwrap();
        assert_eq!(creds.name, "Jane Doe");
        assert_eq!(creds.seat, "12A");
        assert!(creds.persist);
        assert!(!submission("Jane", "1", false).unwrap().persist);
    }
}
