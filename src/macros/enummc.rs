/// 中身を比較できないバリアント(anyhow::Errorなど)を含むエラー型にPartialEqを実装します。
/// opaqueに指定したバリアントは種類が一致すれば等しいとみなします。
#[macro_export]
macro_rules! impl_error_partial_eq {
    ($name:ident { $($variant:ident),* $(,)? } $(, opaque { $($opaque:ident),* $(,)? })?) => {
        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                match (self, other) {
                    $(
                        ($name::$variant, $name::$variant) => true,
                    )*
                    $($(
                        ($name::$opaque(_), $name::$opaque(_)) => true,
                    )*)?
                    _ => false,
                }
            }
        }
    };
}
