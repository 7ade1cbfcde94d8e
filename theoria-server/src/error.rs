use axum::http::header;
use theoria_api::{Error as ApiError, Uuid};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Validation errors raised deep in the database layer travel as
/// `anyhow::Error`, and still reach the client as what they are
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Error {
        match err.downcast::<ApiError>() {
            Ok(err) => Error::Api(err),
            Err(err) => Error::Anyhow(err),
        }
    }
}

impl Error {
    pub fn permission_denied() -> Error {
        Error::Api(ApiError::PermissionDenied)
    }

    pub fn not_found() -> Error {
        Error::Api(ApiError::NotFound)
    }

    pub fn uuid_already_used(uuid: Uuid) -> Error {
        Error::Api(ApiError::UuidAlreadyUsed(uuid))
    }

    pub fn name_already_used(name: String) -> Error {
        Error::Api(ApiError::NameAlreadyUsed(name))
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let err = match self {
            Error::Anyhow(err) => {
                tracing::error!(?err, "internal server error");
                #[cfg(not(test))]
                let err =
                    ApiError::Unknown(String::from("Internal server error, see logs for details"));
                #[cfg(test)]
                let err = ApiError::Unknown(format!("Internal server error: {err:?}"));
                err
            }
            Error::Api(err) => {
                tracing::info!("returning error to client: {err}");
                err
            }
        };
        (
            err.status_code(),
            [(header::CONTENT_TYPE, "application/json")],
            err.contents(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::response::IntoResponse;

    use super::*;

    #[tokio::test]
    async fn api_errors_survive_anyhow() {
        let err = Error::from(anyhow::Error::from(ApiError::EmptyTitle));
        assert!(matches!(err, Error::Api(ApiError::EmptyTitle)));

        let resp = Error::from(anyhow::anyhow!("disk on fire")).into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);

        let resp = Error::not_found().into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::NOT_FOUND);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(ApiError::parse(&body).unwrap(), ApiError::NotFound);
    }
}
