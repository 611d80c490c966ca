use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::PneumoniaModel;
use crate::error::AppError;
use crate::imaging::{open_image, prepare_decoded};
use crate::models::{
    HealthStatus, ModelInfo, PredictionResponse, PredictionResult, StatusMessage, CLASS_NAMES,
    INPUT_SIZE,
};

/// Multipart field carrying the X-ray.
const FILE_FIELD: &str = "file";

pub struct AppState {
    pub model: PneumoniaModel,
    pub max_upload_bytes: usize,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(
            web::scope("/api/v1")
                .service(web::resource("/predict").route(web::post().to(predict)))
                .service(web::resource("/model-info").route(web::get().to(model_info))),
        );
}

pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(StatusMessage {
        message: "Medical Image Classification API is running!",
    })
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthStatus { status: "healthy" })
}

pub async fn model_info(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ModelInfo {
        model_loaded: true,
        input_size: INPUT_SIZE,
        classes: CLASS_NAMES.iter().map(|c| c.to_string()).collect(),
        model_type: state.model.model_type(),
    })
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

pub async fn predict(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let request_id = Uuid::new_v4();
    let upload = read_upload(&mut payload, state.max_upload_bytes).await.map_err(|e| {
        warn!(%request_id, "rejected upload: {}", e);
        e
    })?;

    info!(
        %request_id,
        filename = %upload.filename,
        bytes = upload.bytes.len(),
        "received image"
    );

    let Upload { filename, bytes } = upload;
    let model = state.clone();
    let prediction = web::block(move || -> Result<PredictionResult, AppError> {
        let image = open_image(&bytes).map_err(|e| {
            debug!("image validation failed: {}", e);
            AppError::bad_request("Invalid image file")
        })?;
        let tensor = prepare_decoded(image)?;
        Ok(model.model.predict(&tensor))
    })
    .await?
    .map_err(|e| {
        warn!(%request_id, "prediction failed: {}", e);
        e
    })?;

    if prediction.is_error() {
        warn!(
            %request_id,
            error = prediction.error.as_deref().unwrap_or_default(),
            "model returned an error result"
        );
    }

    Ok(HttpResponse::Ok().json(PredictionResponse {
        success: true,
        prediction,
        filename,
    }))
}

/// Finds the file field, checks its declared type and buffers it.
async fn read_upload(payload: &mut Multipart, limit: usize) -> Result<Upload, AppError> {
    while let Some(item) = payload.next().await {
        let mut field = item?;

        if field.name() != FILE_FIELD {
            drain(&mut field).await?;
            continue;
        }

        let is_image = field
            .content_type()
            .map(|mime| mime.type_().as_str() == "image")
            .unwrap_or(false);
        if !is_image {
            return Err(AppError::bad_request("File must be an image"));
        }

        let filename = field
            .content_disposition()
            .get_filename()
            .unwrap_or_default()
            .to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk?;
            if bytes.len() + data.len() > limit {
                return Err(AppError::PayloadTooLarge { limit });
            }
            bytes.extend_from_slice(&data);
        }

        return Ok(Upload { filename, bytes });
    }

    Err(AppError::bad_request("No file uploaded"))
}

async fn drain(field: &mut Field) -> Result<(), AppError> {
    while let Some(chunk) = field.next().await {
        chunk?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::tests::sample_jpeg;
    use crate::models::{ErrorResponse, Label, ModelType};
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use serde_json::Value;

    const BOUNDARY: &str = "----xraytestboundary";

    fn state(max_upload_bytes: usize) -> web::Data<AppState> {
        web::Data::new(AppState {
            model: PneumoniaModel::placeholder(4, Some(3)).unwrap(),
            max_upload_bytes,
        })
    }

    fn multipart(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(body: Vec<u8>) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/api/v1/predict")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            ))
            .set_payload(body)
    }

    #[actix_rt::test]
    async fn predicts_on_a_valid_jpeg() {
        let app = test::init_service(App::new().app_data(state(1 << 22)).configure(configure)).await;
        let body = multipart("file", "chest.jpg", "image/jpeg", &sample_jpeg(512, 512));

        let resp = test::call_service(&app, upload(body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: PredictionResponse = test::read_body_json(resp).await;
        assert!(body.success);
        assert_eq!(body.filename, "chest.jpg");
        assert!(matches!(body.prediction.label, Label::Normal | Label::Pneumonia));
        assert_eq!(body.prediction.model_type, ModelType::Dummy);
        assert!((body.prediction.probabilities.sum() - 1.0).abs() < 1e-5);
    }

    #[actix_rt::test]
    async fn rejects_non_image_content_type() {
        let app = test::init_service(App::new().app_data(state(1 << 20)).configure(configure)).await;
        let body = multipart("file", "notes.txt", "text/plain", b"hello there");

        let resp = test::call_service(&app, upload(body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: ErrorResponse = test::read_body_json(resp).await;
        assert!(!body.success);
        assert_eq!(body.detail, "File must be an image");
    }

    #[actix_rt::test]
    async fn rejects_corrupt_image_as_client_error() {
        let app = test::init_service(App::new().app_data(state(1 << 20)).configure(configure)).await;
        let jpeg = sample_jpeg(64, 64);
        let body = multipart("file", "broken.jpg", "image/jpeg", &jpeg[..100]);

        let resp = test::call_service(&app, upload(body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.detail, "Invalid image file");
    }

    #[actix_rt::test]
    async fn rejects_random_bytes_labelled_as_image() {
        let app = test::init_service(App::new().app_data(state(1 << 20)).configure(configure)).await;
        let body = multipart("file", "scan.png", "image/png", &[7u8; 300]);

        let resp = test::call_service(&app, upload(body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn enforces_upload_limit() {
        let app = test::init_service(App::new().app_data(state(128)).configure(configure)).await;
        let body = multipart("file", "big.jpg", "image/jpeg", &sample_jpeg(256, 256));

        let resp = test::call_service(&app, upload(body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[actix_rt::test]
    async fn requires_a_file_field() {
        let app = test::init_service(App::new().app_data(state(1 << 20)).configure(configure)).await;
        let body = multipart("attachment", "chest.jpg", "image/jpeg", &sample_jpeg(8, 8));

        let resp = test::call_service(&app, upload(body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.detail, "No file uploaded");
    }

    #[actix_rt::test]
    async fn reports_model_info() {
        let app = test::init_service(App::new().app_data(state(1 << 20)).configure(configure)).await;
        let req = test::TestRequest::get().uri("/api/v1/model-info").to_request();

        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["model_loaded"], true);
        assert_eq!(body["input_size"], serde_json::json!([224, 224]));
        assert_eq!(body["classes"], serde_json::json!(["NORMAL", "PNEUMONIA"]));
        assert_eq!(body["model_type"], "DUMMY");
    }

    #[actix_rt::test]
    async fn serves_liveness_endpoints() {
        let app = test::init_service(App::new().app_data(state(1 << 20)).configure(configure)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");

        let req = test::TestRequest::get().uri("/").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert!(body["message"].as_str().unwrap().contains("running"));
    }
}
