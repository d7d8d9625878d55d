/// Resultがエラーだった場合にメッセージとエラー内容を出してpanicします(テスト用)
#[macro_export]
macro_rules! assert_or_ok {
    ($result:expr, $($arg:tt)+) => {{
        if let Err(e) = &$result {
            panic!("{}\nエラー: {:?}", format!($($arg)+), e);
        }
    }};

    ($result:expr) => {{
        if let Err(e) = &$result {
            panic!("assert_or_ok! failed: {}\nエラー: {:?}", stringify!($result), e);
        }
    }};
}
