//! Microcontroller sketch generation.
//!
//! The tiny-image `tinyml` format ships the quantized model as an Arduino
//! source bundle. The sketch files are embedded as string constants; the
//! three parameterized ones receive the model byte array, its length, the
//! class count, and the label list through `${...}` placeholders.
//!
//! Substitution is strict in both directions: a template missing an
//! expected placeholder fails, and any placeholder left unresolved after
//! substitution fails. Silent best-effort templating is how half-populated
//! sketches end up on devices.

use std::fmt::Write as _;
use std::path::Path;

use tracing::debug;

use crate::error::{KilnError, Result};
use crate::metadata::LabelSet;

/// Main sketch: capture, invoke, respond loop.
const SKETCH_INO: &str = r#"#include <TensorFlowLite.h>

#include "image_provider.h"
#include "model_data.h"
#include "model_settings.h"

#include "tensorflow/lite/micro/all_ops_resolver.h"
#include "tensorflow/lite/micro/micro_error_reporter.h"
#include "tensorflow/lite/micro/micro_interpreter.h"
#include "tensorflow/lite/schema/schema_generated.h"

namespace {
tflite::ErrorReporter* error_reporter = nullptr;
const tflite::Model* model = nullptr;
tflite::MicroInterpreter* interpreter = nullptr;
TfLiteTensor* input = nullptr;

// Arena sized for the 96x96 grayscale classifier produced by the converter.
constexpr int kTensorArenaSize = 136 * 1024;
static uint8_t tensor_arena[kTensorArenaSize];
}  // namespace

void setup() {
  static tflite::MicroErrorReporter micro_error_reporter;
  error_reporter = &micro_error_reporter;

  model = tflite::GetModel(g_model_data);
  if (model->version() != TFLITE_SCHEMA_VERSION) {
    TF_LITE_REPORT_ERROR(error_reporter,
                         "Model schema version %d not equal to supported version %d.",
                         model->version(), TFLITE_SCHEMA_VERSION);
    return;
  }

  static tflite::AllOpsResolver resolver;
  static tflite::MicroInterpreter static_interpreter(
      model, resolver, tensor_arena, kTensorArenaSize, error_reporter);
  interpreter = &static_interpreter;

  if (interpreter->AllocateTensors() != kTfLiteOk) {
    TF_LITE_REPORT_ERROR(error_reporter, "AllocateTensors() failed");
    return;
  }

  input = interpreter->input(0);
}

void loop() {
  if (GetImage(error_reporter, kNumCols, kNumRows, kNumChannels,
               input->data.int8) != kTfLiteOk) {
    TF_LITE_REPORT_ERROR(error_reporter, "Image capture failed.");
  }

  if (interpreter->Invoke() != kTfLiteOk) {
    TF_LITE_REPORT_ERROR(error_reporter, "Invoke failed.");
  }

  TfLiteTensor* output = interpreter->output(0);
  int best = 0;
  for (int i = 1; i < kCategoryCount; ++i) {
    if (output->data.int8[i] > output->data.int8[best]) {
      best = i;
    }
  }
  TF_LITE_REPORT_ERROR(error_reporter, "Detected: %s", kCategoryLabels[best]);
}
"#;

const IMAGE_PROVIDER_HEADER: &str = r#"#ifndef IMAGE_PROVIDER_H_
#define IMAGE_PROVIDER_H_

#include "tensorflow/lite/c/common.h"
#include "tensorflow/lite/micro/micro_error_reporter.h"

// Fill image_data with image_width * image_height * channels int8 pixel
// values from the attached camera.
TfLiteStatus GetImage(tflite::ErrorReporter* error_reporter, int image_width,
                      int image_height, int channels, int8_t* image_data);

#endif  // IMAGE_PROVIDER_H_
"#;

const IMAGE_PROVIDER_SOURCE: &str = r#"#include "image_provider.h"

#include "model_settings.h"

// Stand-in capture routine. Replace with the camera driver for the target
// board (e.g. the OV7675 on the Arduino Nano 33 BLE Sense).
TfLiteStatus GetImage(tflite::ErrorReporter* error_reporter, int image_width,
                      int image_height, int channels, int8_t* image_data) {
  for (int i = 0; i < image_width * image_height * channels; ++i) {
    image_data[i] = 0;
  }
  return kTfLiteOk;
}
"#;

const MODEL_DATA_HEADER: &str = r#"#ifndef MODEL_DATA_H_
#define MODEL_DATA_H_

extern const unsigned char g_model_data[];
extern const int g_model_data_len;

#endif  // MODEL_DATA_H_
"#;

const MODEL_DATA_TEMPLATE: &str = r#"#include "model_data.h"

// Model flatbuffer, aligned for direct use by the TFLite Micro interpreter.
alignas(16) const unsigned char g_model_data[] = {
${model_buf}
};
const int g_model_data_len = ${model_buf_len};
"#;

const MODEL_SETTINGS_HEADER_TEMPLATE: &str = r#"#ifndef MODEL_SETTINGS_H_
#define MODEL_SETTINGS_H_

// Input dimensions the classifier was trained at.
constexpr int kNumCols = 96;
constexpr int kNumRows = 96;
constexpr int kNumChannels = 1;
constexpr int kMaxImageSize = kNumCols * kNumRows * kNumChannels;

constexpr int kCategoryCount = ${num_classes};
extern const char* kCategoryLabels[kCategoryCount];

#endif  // MODEL_SETTINGS_H_
"#;

const MODEL_SETTINGS_SOURCE_TEMPLATE: &str = r#"#include "model_settings.h"

const char* kCategoryLabels[kCategoryCount] = {
    ${labels}
};
"#;

/// Substitute `${key}` placeholders in `template`, strictly.
///
/// Fails if any expected key has no placeholder in the template, or if any
/// placeholder remains unresolved afterwards. `file` names the template in
/// errors.
pub fn substitute(file: &str, template: &str, vars: &[(&str, &str)]) -> Result<String> {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("${{{key}}}");
        if !rendered.contains(&placeholder) {
            return Err(KilnError::TemplateMissingPlaceholder {
                file: file.to_string(),
                placeholder: (*key).to_string(),
            });
        }
        rendered = rendered.replace(&placeholder, value);
    }

    if let Some(placeholder) = find_placeholder(&rendered) {
        return Err(KilnError::TemplateUnresolvedPlaceholder {
            file: file.to_string(),
            placeholder,
        });
    }
    Ok(rendered)
}

/// Find the first `${...}` placeholder left in `text`, if any.
fn find_placeholder(text: &str) -> Option<String> {
    let start = text.find("${")?;
    let rest = &text[start + 2..];
    let end = rest.find('}')?;
    Some(rest[..end].to_string())
}

/// Render model bytes as a C array body: `0x1b, 0x2c, ...`, twelve values
/// per line, indented to match the surrounding initializer.
pub fn render_c_array(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 6);
    for (i, byte) in bytes.iter().enumerate() {
        if i % 12 == 0 {
            if i > 0 {
                out.push('\n');
            }
            out.push_str("    ");
        } else {
            out.push(' ');
        }
        let _ = write!(out, "0x{byte:02x},");
    }
    out
}

/// Render labels as a C string initializer list: `"up", "down"`.
fn render_label_list(labels: &LabelSet) -> String {
    labels
        .iter()
        .map(|label| format!("\"{}\"", label.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Write the populated sketch bundle into `sketch_dir`.
pub fn render_sketch(sketch_dir: &Path, model_bytes: &[u8], labels: &LabelSet) -> Result<()> {
    std::fs::create_dir_all(sketch_dir)
        .map_err(|e| KilnError::io("creating sketch dir", sketch_dir, e))?;

    let model_data = substitute(
        "model_data.cpp",
        MODEL_DATA_TEMPLATE,
        &[
            ("model_buf", &render_c_array(model_bytes)),
            ("model_buf_len", &model_bytes.len().to_string()),
        ],
    )?;
    let settings_header = substitute(
        "model_settings.h",
        MODEL_SETTINGS_HEADER_TEMPLATE,
        &[("num_classes", &labels.len().to_string())],
    )?;
    let settings_source = substitute(
        "model_settings.cpp",
        MODEL_SETTINGS_SOURCE_TEMPLATE,
        &[("labels", &render_label_list(labels))],
    )?;

    let files: [(&str, &str); 7] = [
        ("sketch.ino", SKETCH_INO),
        ("image_provider.h", IMAGE_PROVIDER_HEADER),
        ("image_provider.cpp", IMAGE_PROVIDER_SOURCE),
        ("model_data.h", MODEL_DATA_HEADER),
        ("model_data.cpp", &model_data),
        ("model_settings.h", &settings_header),
        ("model_settings.cpp", &settings_source),
    ];
    for (name, content) in files {
        let path = sketch_dir.join(name);
        std::fs::write(&path, content)
            .map_err(|e| KilnError::io("writing sketch file", &path, e))?;
    }

    debug!(
        files = files.len(),
        bytes = model_bytes.len(),
        "sketch rendered at {}",
        sketch_dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_substitute_happy_path() {
        let out = substitute("t", "count = ${n};", &[("n", "4")]).unwrap();
        assert_eq!(out, "count = 4;");
    }

    #[test]
    fn test_substitute_missing_placeholder_fails() {
        let err = substitute("t", "count = 4;", &[("n", "4")]).unwrap_err();
        match err {
            KilnError::TemplateMissingPlaceholder {
                file, placeholder, ..
            } => {
                assert_eq!(file, "t");
                assert_eq!(placeholder, "n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_substitute_unresolved_placeholder_fails() {
        let err = substitute("t", "a = ${a}; b = ${b};", &[("a", "1")]).unwrap_err();
        match err {
            KilnError::TemplateUnresolvedPlaceholder { placeholder, .. } => {
                assert_eq!(placeholder, "b");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_c_array_layout() {
        let rendered = render_c_array(&[0x00, 0xff, 0x1b]);
        assert_eq!(rendered, "    0x00, 0xff, 0x1b,");

        let thirteen = render_c_array(&[0xaa; 13]);
        let lines: Vec<&str> = thirteen.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].matches("0xaa,").count(), 12);
        assert_eq!(lines[1].matches("0xaa,").count(), 1);
    }

    #[test]
    fn test_label_list_rendering() {
        let labels = LabelSet::new(vec!["up".into(), "down".into()]);
        assert_eq!(render_label_list(&labels), "\"up\", \"down\"");
    }

    #[test]
    fn test_render_sketch_resolves_everything() {
        let dir = TempDir::new().unwrap();
        let sketch = dir.path().join("sketch");
        let labels = LabelSet::new(vec!["up".into(), "down".into()]);
        render_sketch(&sketch, &[0x01, 0x02, 0x03], &labels).unwrap();

        let model_data = std::fs::read_to_string(sketch.join("model_data.cpp")).unwrap();
        assert!(model_data.contains("0x01, 0x02, 0x03,"));
        assert!(model_data.contains("g_model_data_len = 3;"));
        assert!(!model_data.contains("${"));

        let header = std::fs::read_to_string(sketch.join("model_settings.h")).unwrap();
        assert!(header.contains("kCategoryCount = 2;"));

        let source = std::fs::read_to_string(sketch.join("model_settings.cpp")).unwrap();
        assert!(source.contains("\"up\", \"down\""));

        assert!(sketch.join("sketch.ino").is_file());
        assert!(sketch.join("image_provider.cpp").is_file());
        assert!(sketch.join("model_data.h").is_file());
    }
}
