use crate::error::{Error, Result};

/// 一時的な失敗として再試行すべきエラーかどうか
///
/// レート制限（429）のみ再試行対象。バックオフは呼び出し側の
/// リトライラッパーに委ねる。
pub fn should_retry(error: &Error) -> bool {
    error.status() == Some(429)
}

/// リソース不在（404）エラーかどうか
pub fn is_not_found(error: &Error) -> bool {
    error.status() == Some(404)
}

/// 不正リクエスト（400）エラーかどうか
///
/// 単一リソースの取得ではバックエンドが「該当なし」を400で返すことが
/// あるため、呼び出し側の文脈によって不在として扱われる。
pub fn is_bad_request(error: &Error) -> bool {
    error.status() == Some(400)
}

/// 単一リソース取得の結果を「不在ならNone」に変換
///
/// 404/400は行なしとして回復し、それ以外のエラーはそのまま伝播する。
pub fn not_found_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_not_found(&e) || is_bad_request(&e) => Ok(None),
        Err(e) => Err(e),
    }
}
