macro_rules! derive_Decode {
    ($t:ty) => {
        impl crate::decode::Decode for $t {
            fn decode(
                de: &mut crate::decode::Decoder<'_>,
            ) -> Result<Self, crate::decode::DecodeError> {
                Ok(Self(de.fetch()?))
            }
        }
    };

    (@name $t:ty, $($f:ident),+) => {
        impl crate::decode::Decode for $t {
            fn decode(
                de: &mut crate::decode::Decoder<'_>,
            ) -> Result<Self, crate::decode::DecodeError> {
                $(let $f = de.fetch_name()?;)+
                Ok(Self{$($f),+})
            }
        }
    };

    (@arg_name $t:ty, $arg:ident, $name:ident) => {
        impl crate::decode::Decode for $t {
            fn decode(
                de: &mut crate::decode::Decoder<'_>,
            ) -> Result<Self, crate::decode::DecodeError> {
                let $arg = de.fetch()?;
                let $name = de.fetch_name()?;
                Ok(Self{$arg, $name})
            }
        }
    };

    (@arg_data $t:ty, $arg:ident, $data:ident) => {
        impl crate::decode::Decode for $t {
            fn decode(
                de: &mut crate::decode::Decoder<'_>,
            ) -> Result<Self, crate::decode::DecodeError> {
                let $arg = de.fetch()?;
                let $data = de.fetch_remaining();
                Ok(Self{$arg, $data})
            }
        }
    };

    (@empty $t:ty) => {
        impl crate::decode::Decode for $t {
            fn decode(
                _: &mut crate::decode::Decoder<'_>,
            ) -> Result<Self, crate::decode::DecodeError> {
                Ok(Self(()))
            }
        }
    }
}

macro_rules! derive_Encode {
    ($t:ty) => {
        impl crate::encode::Encode for $t {
            fn encode<'c>(&'c self, out: &mut crate::encode::ReplyBuf<'c>) {
                out.put(&self.0);
            }
        }
    };
}

macro_rules! declare_relation {
    ($op:ty => $reply:ident<'_>) => {
        impl<'a> crate::ops::IsReplyOf<$op> for $reply<'a> {}
    };

    ($op:ty => $reply:ty) => {
        impl crate::ops::IsReplyOf<$op> for $reply {}
    };
}

macro_rules! getters {
    ($($f:ident: $t:ty,)+) => {$(
        #[must_use]
        pub const fn $f(&self) -> $t {
            self.0.$f
        }
    )+};
}

macro_rules! setters {
    ($($f:ident: $t:ty,)+) => {$(
        pub fn $f(&mut self, $f: $t) -> &mut Self {
            self.0.$f = $f;
            self
        }
    )+};
}

/// Writes a correlated line to an optional debug sink, tagging the call
/// site.
macro_rules! op_trace {
    ($sink:expr, $op_id:expr, $($arg:tt)+) => {
        if let Some(sink) = ($sink).as_ref() {
            sink.log_op($op_id, file!(), line!(), format_args!($($arg)+));
        }
    };
}
