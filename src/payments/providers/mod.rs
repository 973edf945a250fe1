pub mod alipay;
pub mod paypal;
pub mod stripe;
pub mod wechat;

pub use alipay::AlipayProvider;
pub use paypal::PaypalProvider;
pub use stripe::StripeProvider;
pub use wechat::WechatProvider;
